pub mod candidate;
pub mod capture;
pub mod cgi;
pub mod config;
pub mod content_type;
pub mod dispatcher;
pub mod exception;
pub mod fetcher;
pub mod legacy;
pub mod live;
pub mod mirror;
pub mod param;
pub mod request;
pub mod resolver;
pub mod response;
pub mod server;
pub mod util;

pub use candidate::{Candidate, CandidateKind, CandidateSet};
pub use config::{Config, LegacyMode};
pub use dispatcher::{ContentServer, Dispatcher};
pub use exception::Exception;
pub use legacy::{LegacyOutcome, LegacyServer, Tier};
pub use param::{HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::{Body, Response};
pub use util::HtmlBuilder;
