pub mod gateway;
pub mod parser;

pub use gateway::ConfirmationGateway;
pub use parser::{parse, AmountArg, Command, ParseError};

/// One raw command line received from the remote channel. The listener only
/// produces these; parsing and authorization happen at dispatch.
#[derive(Debug, Clone)]
pub struct IncomingCommand {
    pub requester: String,
    pub text: String,
}
