//! Error taxonomy for the frame graph.
//!
//! Follows the manual `fmt::Display` + `std::error::Error` style already used
//! by this codebase's allocator modules rather than pulling in a derive
//! macro: every error here is a small, closed enum and the impls are a few
//! lines each.

use std::fmt;

use crate::ids::{NodeIndex, NodeTypeId, PinId, PinSlot};

/// Errors raised while validating a [`crate::template::GraphTemplate`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TemplateError {
    UnknownNodeType(NodeTypeId),
    UnknownPin { node: NodeIndex, slot: PinSlot },
    PinKindMismatch { node: NodeIndex, slot: PinSlot },
    TypeMismatch { node: NodeIndex, slot: PinSlot },
    DuplicateInput { node: NodeIndex, slot: PinSlot },
    CyclicGraph,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UnknownNodeType(id) => {
                write!(f, "no node type registered for id {id:?}")
            }
            TemplateError::UnknownPin { node, slot } => {
                write!(f, "node {node:?} has no pin at slot {slot:?}")
            }
            TemplateError::PinKindMismatch { node, slot } => {
                write!(f, "connection touches pin {slot:?} on node {node:?} with an incompatible kind")
            }
            TemplateError::TypeMismatch { node, slot } => {
                write!(f, "connection touches pin {slot:?} on node {node:?} with an incompatible payload type")
            }
            TemplateError::DuplicateInput { node, slot } => {
                write!(f, "input pin {slot:?} on node {node:?} already has a connection")
            }
            TemplateError::CyclicGraph => write!(f, "graph template contains a cycle"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Errors raised while a node's `build` callback runs, or while the planner
/// and transient pool process the resulting access list. Collected into a
/// list per frame; a non-empty list drops the frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildError {
    ResourceProducedTwice { pin: PinId },
    ResourceWithoutProducer { pin: PinId },
    UsageEscalation { pin: PinId },
    OutOfMemory,
    StagingOverflow { requested: u64, available: u64 },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::ResourceProducedTwice { pin } => {
                write!(f, "pin {pin:?} was produced by more than one node in the same frame")
            }
            BuildError::ResourceWithoutProducer { pin } => {
                write!(f, "pin {pin:?} was read but never produced")
            }
            BuildError::UsageEscalation { pin } => {
                write!(f, "pin {pin:?} was used in a way the transient pool cannot satisfy")
            }
            BuildError::OutOfMemory => write!(f, "transient pool exhausted its backing memory"),
            BuildError::StagingOverflow { requested, available } => write!(
                f,
                "staging ring overflowed: requested {requested} bytes, {available} available"
            ),
        }
    }
}

impl std::error::Error for BuildError {}

/// Errors that can only be observed while recording/submitting GPU work.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecuteError {
    DeviceLost,
    MissingPipeline { node: NodeIndex },
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::DeviceLost => write!(f, "device lost during frame execution"),
            ExecuteError::MissingPipeline { node } => {
                write!(f, "node {node:?} recorded commands without a bound pipeline")
            }
        }
    }
}

impl std::error::Error for ExecuteError {}

/// Top-level failure of [`crate::graph::FrameGraph::execute_frame`].
#[derive(Clone, Debug)]
pub enum FrameError {
    Build(Vec<BuildError>),
    Execute(ExecuteError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Build(errors) => {
                write!(f, "frame dropped: {} build error(s)", errors.len())?;
                for e in errors {
                    write!(f, "; {e}")?;
                }
                Ok(())
            }
            FrameError::Execute(e) => write!(f, "frame execution failed: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Failure of [`crate::registry::NodeRegistry::register`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistryError {
    pub id: NodeTypeId,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node type {:?} is already registered", self.id)
    }
}

impl std::error::Error for RegistryError {}

/// Failure of [`crate::device::GpuDevice`] operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceError {
    OutOfMemory,
    Lost,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OutOfMemory => write!(f, "device out of memory"),
            DeviceError::Lost => write!(f, "device lost"),
        }
    }
}

impl std::error::Error for DeviceError {}
