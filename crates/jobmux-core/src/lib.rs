pub mod config;
pub mod logging;

pub mod channel;
pub mod control;
pub mod error;
pub mod job;
pub mod manager;
pub mod multi;
pub mod request;
pub mod response;
pub mod transport;

pub use channel::{Channel, ResponseHandler};
pub use control::CancelToken;
pub use error::{Error, Result, TransportError};
pub use job::{JobBatch, JobContext, JobId, JobState, Payload};
pub use manager::{ChannelId, ChannelManager, ManagerConfig};
pub use multi::{MultiChannel, MultiPayload, ResponseMap};
pub use request::{Method, PreparedRequest, RequestTemplate};
pub use response::{HttpResponseBuilder, Response, ResponseBuilder, StatusClass};
pub use transport::{CurlTransport, MemoryTransport, Transport};
