//! Greedy stacking of order components.
//!
//! Boxes are sorted heaviest first (stable, so equal weights keep their input
//! order) and placed one after another on the first open stack whose top box
//! can still bear them. A box that fits nowhere opens a new stack.
//!
//! When a box is placed on another box, its own capacity is capped to what
//! the stack below can still support. The heuristic is first-fit, not
//! best-fit, and makes no attempt to minimise the number of stacks.

use serde::Serialize;
use utoipa::ToSchema;

use crate::model::StackBox;

/// A vertical stack of boxes, bottom first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stack {
    boxes: Vec<StackBox>,
}

impl Stack {
    fn with_base(base: StackBox) -> Self {
        Self { boxes: vec![base] }
    }

    /// Boxes from bottom (index 0) to top.
    #[cfg(test)]
    pub fn boxes(&self) -> &[StackBox] {
        &self.boxes
    }

    pub fn into_boxes(self) -> Vec<StackBox> {
        self.boxes
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Remaining weight the topmost box can bear.
    pub fn top_capacity(&self) -> Option<f64> {
        self.boxes.last().map(|b| b.capacity)
    }

    /// Checks whether a box of the given weight may be placed on top.
    pub fn accepts(&self, weight: f64) -> bool {
        self.top_capacity()
            .is_some_and(|capacity| capacity >= weight)
    }

    pub fn total_weight(&self) -> f64 {
        self.boxes.iter().map(|b| b.weight).sum()
    }

    /// Places a box on top, capping its capacity to what remains below.
    ///
    /// Returns `true` when the capacity of the placed box was reduced.
    fn place(&mut self, mut item: StackBox) -> bool {
        let Some(below) = self.top_capacity() else {
            self.boxes.push(item);
            return false;
        };

        let remaining = below - item.weight;
        let adjusted = remaining < item.capacity;
        if adjusted {
            item.capacity = remaining;
        }
        self.boxes.push(item);
        adjusted
    }
}

/// Steps reported while stacking, for live visualisation.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum StackEvent {
    /// A box opened a new stack.
    StackStarted {
        stack_id: usize,
        weight: f64,
        capacity: f64,
    },
    /// A box was placed on an existing stack.
    BoxPlaced {
        stack_id: usize,
        level: usize,
        weight: f64,
        capacity: f64,
        capacity_adjusted: bool,
    },
    /// Stacking finished.
    Finished { stacks: usize, boxes: usize },
}

/// Partitions boxes into stacks.
///
/// Takes ownership of the boxes; the returned stacks hold the same boxes with
/// capacities adjusted where they were placed on another box.
///
/// # Parameters
/// * `boxes` - Components of one order, in any order
///
/// # Returns
/// Stacks in creation order, each bottom to top
pub fn stack_boxes(boxes: Vec<StackBox>) -> Vec<Stack> {
    stack_boxes_with_progress(boxes, |_| {})
}

/// Like `stack_boxes`, but calls `on_event` for every step.
pub fn stack_boxes_with_progress(
    boxes: Vec<StackBox>,
    mut on_event: impl FnMut(&StackEvent),
) -> Vec<Stack> {
    let box_count = boxes.len();

    // Heaviest first; sort_by is stable so equal weights keep input order.
    let mut boxes = boxes;
    boxes.sort_by(|a, b| b.weight.total_cmp(&a.weight));

    let mut stacks: Vec<Stack> = Vec::new();

    for item in boxes {
        match stacks.iter().position(|stack| stack.accepts(item.weight)) {
            Some(idx) => {
                let stack = &mut stacks[idx];
                let weight = item.weight;
                let capacity_adjusted = stack.place(item);
                let level = stack.len() - 1;
                let capacity = stack.top_capacity().unwrap_or_default();
                on_event(&StackEvent::BoxPlaced {
                    stack_id: idx + 1,
                    level,
                    weight,
                    capacity,
                    capacity_adjusted,
                });
            }
            None => {
                on_event(&StackEvent::StackStarted {
                    stack_id: stacks.len() + 1,
                    weight: item.weight,
                    capacity: item.capacity,
                });
                stacks.push(Stack::with_base(item));
            }
        }
    }

    on_event(&StackEvent::Finished {
        stacks: stacks.len(),
        boxes: box_count,
    });

    stacks
}
