//! Protocol constants and configuration values

/// Default Asterisk Manager Interface port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Default host when none is configured
pub const DEFAULT_AMI_HOST: &str = "127.0.0.1";

/// Socket buffer size for reading from the transport (64KB)
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Maximum carry-over buffer size (16MB) - safety limit to prevent runaway memory.
/// No manager block comes close; exceeding it means the peer is not speaking AMI.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Line terminator used for outbound blocks
pub const LINE_TERMINATOR: &str = "\r\n";

/// Block terminator used for outbound blocks
pub const BLOCK_TERMINATOR: &str = "\r\n\r\n";

/// Block delimiters accepted on input. Some Asterisk builds emit bare `\n`.
pub const BLOCK_DELIMITERS: [&[u8]; 2] = [b"\r\n\r\n", b"\n\n"];

/// Sentinel closing the output of a legacy `Response: Follows` command reply
pub const END_COMMAND_SENTINEL: &str = "--END COMMAND--";

/// `Response` values treated as success
pub const SUCCESS_RESPONSES: [&str; 3] = ["Success", "Follows", "Goodbye"];

/// TCP connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Delay before a reconnect attempt in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Keepalive `Ping` interval in milliseconds
pub const DEFAULT_PING_INTERVAL_MS: u64 = 10_000;

/// Longest action timeout honoured, in milliseconds (365 days)
///
/// Longer timeouts, per action or from config, are clamped to this.
pub const MAX_ACTION_TIMEOUT_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Action id prefix; followed by a per-manager UUID and a counter
pub const ACTION_ID_PREFIX: &str = "action";
