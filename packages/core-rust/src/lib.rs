//! meshnode core: call context, fault model, and payload codecs shared by
//! the node server and its business methods.

pub mod codec;
pub mod context;
pub mod fault;
pub mod metadata;
pub mod types;

pub use codec::{CodecError, PayloadCodec};
pub use context::{CallContext, CallOutcome, CallState};
pub use fault::{Fault, FaultClass, FaultDescriptor};
pub use metadata::Metadata;
pub use types::{Principal, Value};
