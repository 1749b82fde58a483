pub mod error;
pub mod hosting;
pub mod progression;
pub mod provisioning;
pub mod store;

pub use error::{PortalError, Result};
pub use hosting::SourceHosting;
pub use progression::ProgressionEngine;
pub use provisioning::{FailurePayload, ProvisionPayload, ProvisioningService, StatusPayload};
pub use store::{DataStore, MemoryStore};
