/// Configuration for a client connection.
#[derive(Clone)]
pub struct Config {
    /// Capacity of the outbound send queue, in messages. Pushes beyond this
    /// are rejected without blocking the producer.
    pub max_messages: usize,
    /// Size of the fixed receive buffer in bytes. Bounds how much one recv
    /// call can deliver to the data callback.
    pub recv_buf_size: usize,
    /// Disable the Nagle algorithm (TCP_NODELAY) once connected.
    pub tcp_nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_messages: 32,
            recv_buf_size: 65536,
            tcp_nodelay: false,
        }
    }
}
