//! Local interaction state for the current user.
//!
//! Selection and drag are one state machine rather than two flags, so the
//! drag marker can never outlive the selection it belongs to. The lease timer
//! reads it to decide whether an expiring lock is still in use.

use tokio::sync::watch;

use shapesync_core::{Point, ShapeId};

/// What the local user is doing with the canvas
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Interaction {
    #[default]
    Idle,
    /// Has a shape selected (and normally holds its lock)
    Selected { shape_id: ShapeId },
    /// Mid-drag, with the position to restore if the drag is abandoned
    Dragging { shape_id: ShapeId, origin: Point },
}

impl Interaction {
    /// Shape this interaction is about
    pub fn shape_id(&self) -> Option<&ShapeId> {
        match self {
            Interaction::Idle => None,
            Interaction::Selected { shape_id } | Interaction::Dragging { shape_id, .. } => Some(shape_id),
        }
    }

    pub fn is_dragging(&self, shape: &ShapeId) -> bool {
        matches!(self, Interaction::Dragging { shape_id, .. } if shape_id == shape)
    }

    /// Pre-drag position, while dragging
    pub fn drag_origin(&self) -> Option<Point> {
        match self {
            Interaction::Dragging { origin, .. } => Some(*origin),
            _ => None,
        }
    }
}

/// Owner of the local [`Interaction`], observable through a watch channel
#[derive(Debug)]
pub struct InteractionState {
    tx: watch::Sender<Interaction>,
}

impl Default for InteractionState {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Interaction::Idle);
        Self { tx }
    }

    pub fn current(&self) -> Interaction {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Interaction> {
        self.tx.subscribe()
    }

    /// Select `shape`, abandoning whatever was going on before
    pub fn select(&self, shape: ShapeId) {
        self.tx.send_replace(Interaction::Selected { shape_id: shape });
    }

    /// Start dragging the selected shape. Refused unless `shape` is selected.
    pub fn begin_drag(&self, shape: &ShapeId, origin: Point) -> bool {
        self.tx.send_if_modified(|state| {
            if !matches!(&*state, Interaction::Selected { shape_id } if shape_id == shape) {
                return false;
            }
            *state = Interaction::Dragging {
                shape_id: shape.clone(),
                origin,
            };
            true
        })
    }

    /// Finish a drag; returns the origin it started from
    pub fn end_drag(&self, shape: &ShapeId) -> Option<Point> {
        let mut origin = None;
        self.tx.send_if_modified(|state| {
            origin = match &*state {
                Interaction::Dragging { shape_id, origin } if shape_id == shape => Some(*origin),
                _ => None,
            };
            if origin.is_some() {
                *state = Interaction::Selected {
                    shape_id: shape.clone(),
                };
            }
            origin.is_some()
        });
        origin
    }

    /// Back to idle if `shape` is the one selected or dragged
    pub fn release(&self, shape: &ShapeId) {
        self.tx.send_if_modified(|state| {
            if state.shape_id() == Some(shape) {
                *state = Interaction::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Predicate for the lease timer: true while `shape` is being dragged
    pub fn dragging_predicate(&self, shape: ShapeId) -> impl Fn() -> bool + Send + Sync + 'static {
        let rx = self.tx.subscribe();
        move || rx.borrow().is_dragging(&shape)
    }
}
