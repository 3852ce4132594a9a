//! Protocol constants and configuration values

/// Default Asterisk Manager Interface port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// The first line the switch sends on connect starts with this literal,
/// followed by `/<version>` (e.g. `Asterisk Call Manager/1.1`).
pub const BANNER_PREFIX: &str = "Asterisk Call Manager";

/// Wire line terminator. A line consisting only of this closes a message.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Delay before a new connect attempt after a failure or drop
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Longest line accepted from the socket (1 MiB). Anything larger means
/// the peer is not speaking AMI.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Lines buffered between the socket reader and the connection actor.
///
/// A capacity of one gives "read one line, then wait to be asked for the
/// next" flow control: the reader cannot run ahead of the actor.
pub const INBOUND_QUEUE_SIZE: usize = 1;

/// Serialized actions queued for the socket writer. Filling it means the
/// switch stopped reading, and the connection is dropped.
pub const OUTBOUND_QUEUE_SIZE: usize = 64;
