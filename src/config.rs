use clap::Parser;

/// Bootstrap CLI surface. Grounded on `comnipl-redis-rwproxy`'s `Args`
/// struct: a `clap`-derived struct with `#[arg(long, default_value_t)]`
/// fields, no subcommands.
#[derive(Parser, Debug, Clone)]
#[command(name = "kvrs", version, about = "In-memory key-value store with RESP2 and replication")]
pub struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Run as a replica of "<host> <port>". Absent means master mode.
    #[arg(long)]
    pub replicaof: Option<String>,

    /// Raise the default log level; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// The `(host, port)` pair to dial, parsed from `--replicaof "<host> <port>"`.
    pub fn replica_of_addr(&self) -> Option<Result<(String, u16), String>> {
        self.replicaof.as_ref().map(|value| {
            let mut parts = value.split_whitespace();
            let host = parts.next().ok_or_else(|| "missing host in --replicaof".to_string())?;
            let port = parts
                .next()
                .ok_or_else(|| "missing port in --replicaof".to_string())?
                .parse::<u16>()
                .map_err(|_| "invalid port in --replicaof".to_string())?;
            Ok((host.to_string(), port))
        })
    }

    pub fn default_log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replicaof_host_and_port() {
        let args = Args {
            port: 6379,
            replicaof: Some("localhost 6380".to_string()),
            verbose: 0,
        };
        assert_eq!(
            args.replica_of_addr().unwrap().unwrap(),
            ("localhost".to_string(), 6380)
        );
    }

    #[test]
    fn rejects_malformed_replicaof() {
        let args = Args {
            port: 6379,
            replicaof: Some("localhost".to_string()),
            verbose: 0,
        };
        assert!(args.replica_of_addr().unwrap().is_err());
    }
}
