use std::time::Duration;

/// Client configuration parameters for connection management and watch
/// streams
///
/// # Key Configuration Areas
/// - Connection establishment (TCP handshake timeout)
/// - Unary request lifecycle control
/// - HTTP/2 keepalive
/// - Watch stream reconnect backoff and buffering
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum time to wait for establishing a TCP connection
    /// Default: 1 second
    pub connect_timeout: Duration,

    /// Deadline of unary calls such as `GetAppServers`. Watch streams are
    /// long-lived and carry no deadline.
    /// Default: 3 seconds
    pub request_timeout: Duration,

    /// TCP keepalive duration for idle connections
    /// Default: 5 minutes (300s)
    pub tcp_keepalive: Duration,

    /// Interval for HTTP/2 keepalive pings
    /// Default: 10 seconds
    pub http2_keepalive_interval: Duration,

    /// Timeout for HTTP/2 keepalive pings
    /// Default: 3 seconds
    pub http2_keepalive_timeout: Duration,

    /// Send keepalive pings even when no stream is open
    /// Default: true
    pub keep_alive_while_idle: bool,

    /// Enable Gzip compression for network traffic
    /// Default: true (enabled)
    pub enable_compression: bool,

    /// Largest response message accepted
    /// Default: 10MB
    pub max_decoding_message_size: usize,

    /// First reconnect delay of a watch stream; grows by 25% per attempt
    /// Default: 1ms
    pub watch_backoff_base: Duration,

    /// Reconnect delay cap
    /// Default: 2 seconds
    pub watch_backoff_max: Duration,

    /// Responses buffered between a watch stream and its subscriber
    /// Default: 16
    pub response_buffer_size: usize,

    /// Requests buffered ahead of the physical stream
    /// Default: 16
    pub request_buffer_size: usize,

    /// After a graceful close sends its cancel request, how long the stream
    /// waits for the server's `canceled` response
    /// Default: 1 second
    pub cancel_linger: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(3000),
            tcp_keepalive: Duration::from_secs(300),
            http2_keepalive_interval: Duration::from_secs(10),
            http2_keepalive_timeout: Duration::from_secs(3),
            keep_alive_while_idle: true,
            enable_compression: true,
            max_decoding_message_size: 10 * 1024 * 1024,
            watch_backoff_base: Duration::from_millis(1),
            watch_backoff_max: Duration::from_millis(2000),
            response_buffer_size: 16,
            request_buffer_size: 16,
            cancel_linger: Duration::from_secs(1),
        }
    }
}
