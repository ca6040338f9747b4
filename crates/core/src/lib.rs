//! Vantage core types: descriptors, model registry, metric keys, errors.

#![forbid(unsafe_code)]

pub mod descriptor;
pub mod error;
pub mod metric;
pub mod model;

pub use descriptor::{DescriptorOpts, ResourceDescriptor};
pub use error::{VantageError, VantageResult};
pub use metric::{MetricKey, MetricState};
pub use model::Model;

pub mod prelude {
    pub use super::{DescriptorOpts, MetricKey, MetricState, Model, ResourceDescriptor, VantageError, VantageResult};
}
