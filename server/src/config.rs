use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings of the ranked server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Number of worker threads.
    pub workers: usize,
    /// Connections one worker polls at most.
    pub connections_per_worker: usize,
    /// Pause between two sweeps over a worker's connections.
    pub sweep_interval: Duration,
    /// Time allowed to read one whole frame once its first byte has
    /// arrived, and bound on one blocking write.
    pub io_timeout: Duration,
    pub data_dir: PathBuf,
    pub users_file: String,
    pub scoreboard_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], shared::SERVER_PORT)),
            workers: 16,
            connections_per_worker: 8,
            sweep_interval: Duration::from_millis(100),
            io_timeout: Duration::from_secs(2),
            data_dir: PathBuf::from("."),
            users_file: "user_list.json".to_string(),
            scoreboard_file: "scoreboard.csv".to_string(),
        }
    }
}

impl ServerConfig {
    /// Listen backlog and bound of the pending-connection queue.
    pub fn max_clients(&self) -> usize {
        2 * self.workers * self.connections_per_worker
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join(&self.users_file)
    }

    pub fn scoreboard_path(&self) -> PathBuf {
        self.data_dir.join(&self.scoreboard_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 45735);
        assert_eq!(config.max_clients(), 256);
        assert_eq!(config.users_path(), PathBuf::from("./user_list.json"));
        assert_eq!(config.scoreboard_path(), PathBuf::from("./scoreboard.csv"));
    }

    #[test]
    fn test_max_clients_scales_with_pool() {
        let config = ServerConfig {
            workers: 2,
            connections_per_worker: 3,
            ..ServerConfig::default()
        };
        assert_eq!(config.max_clients(), 12);
    }
}
