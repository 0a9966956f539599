use thiserror::Error;

use crate::dom::NodeId;

pub type Result<T> = std::result::Result<T, DomError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),

    #[error("hierarchy error: {child:?} cannot be inserted into {parent:?}")]
    Hierarchy { parent: NodeId, child: NodeId },

    #[error("node {reference:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, reference: NodeId },

    #[error("node {0:?} is attached to a parent")]
    Attached(NodeId),
}
