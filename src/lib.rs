//! Frame graph core: a per-frame declarative description of GPU passes and
//! their resource dependencies, compiled each frame into a correctly-ordered
//! command stream with automatic transient-resource allocation, barrier
//! insertion, layout tracking, and lifetime reuse.
//!
//! This crate sits directly above a low-level GPU wrapper (device, queue,
//! swapchain, allocator) that it consumes through the narrow [`device`]
//! trait boundary rather than linking against a concrete backend. Everything
//! else in the surrounding engine — the entity store, asset/resource
//! registry, reflection, editor, shader compiler, concrete render passes —
//! is an external collaborator the graph never reaches into; it only
//! consumes opaque handles and staged byte ranges those collaborators
//! produce.
//!
//! Module map, leaves first:
//! - [`types`], [`ids`], [`error`] — shared scalars, opaque handles, and the
//!   error taxonomy.
//! - [`registry`] — C1, the node-type registry.
//! - [`pin`] — C3, the type-erased pin storage arena.
//! - [`template`] — C2, the immutable authored graph description.
//! - [`planner`] — C4, topological linearization and resource lifetimes.
//! - [`build`] — C5, the `build` callback façade.
//! - [`pool`] — C6, the transient pool and stable-resource table.
//! - [`barrier`] — C7, the barrier and layout tracker.
//! - [`execute`] — C8, the `execute` callback façade.
//! - [`staging`] — C9, the host-to-device upload ring.
//! - [`device`] — C10, the GPU device boundary (plus an in-memory mock).
//! - [`graph`] — C11, [`graph::FrameGraph`], the runtime that ties everything
//!   together.
//! - [`config`] — ambient pool/ring tuning, layered the way the rest of the
//!   engine loads its settings.
//! - [`dot`] — ambient Graphviz diagnostics.

pub mod barrier;
pub mod build;
pub mod config;
pub mod device;
pub mod dot;
pub mod env;
pub mod error;
pub mod execute;
pub mod graph;
pub mod ids;
pub mod init;
pub mod pin;
pub mod planner;
pub mod pool;
pub mod registry;
pub mod resource;
pub mod staging;
pub mod template;
pub mod types;

pub use build::BuildContext;
pub use env::GraphEnv;
pub use error::{BuildError, DeviceError, ExecuteError, FrameError, RegistryError, TemplateError};
pub use execute::ExecuteContext;
pub use graph::FrameGraph;
pub use init::InitContext;
pub use registry::{NodeDescriptor, NodeRegistry, NodeTypeId};
pub use template::{ConnectionSpec, GraphTemplate, NodeInstantiation};
