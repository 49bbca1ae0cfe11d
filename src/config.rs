/// Server settings, read from the environment.
///
/// | Variable | Default |
/// |---|---|
/// | `VLCSTREAM_BIND_ADDR` | `0.0.0.0` |
/// | `VLCSTREAM_BASE_PORT` | `3800` |
/// | `VLCSTREAM_QUEUED_OUTPUT` | `false` |
/// | `VLCSTREAM_QUEUE_DEPTH` | `8` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Port of the left-front camera; the others follow consecutively.
    pub base_port: u16,
    /// Transmit from a dedicated thread instead of the encoder callback.
    pub queued_output: bool,
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            base_port: 3800,
            queued_output: false,
            queue_depth: 8,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            bind_addr: read_env_string("VLCSTREAM_BIND_ADDR", &defaults.bind_addr),
            base_port: read_env_u16("VLCSTREAM_BASE_PORT", defaults.base_port),
            queued_output: read_env_bool("VLCSTREAM_QUEUED_OUTPUT", defaults.queued_output),
            queue_depth: read_env_usize("VLCSTREAM_QUEUE_DEPTH", defaults.queue_depth),
        };
        log::debug!("Server config: {:?}", config);
        config
    }

    /// Transmit queue depth, when queued output is enabled.
    pub fn queue(&self) -> Option<usize> {
        self.queued_output.then_some(self.queue_depth.max(1))
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => parse_bool(&v).unwrap_or_else(|| {
            log::warn!("Ignoring {}='{}', expected a boolean", name, v);
            default
        }),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_u16(name: &str, default: u16) -> u16 {
    read_env_number(name, default)
}

fn read_env_usize(name: &str, default: usize) -> usize {
    read_env_number(name, default)
}

fn read_env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("Ignoring {}='{}', expected a number", name, v);
            default
        }),
        Err(_) => default,
    }
}

fn read_env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
