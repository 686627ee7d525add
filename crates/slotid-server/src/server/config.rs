use anyhow::{Context, bail};
use clap::Parser;
use slotid::IdRange;
use std::time::Duration;

/// Runtime configuration for the `slotid-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single local
/// instance.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "slotid-server",
    version,
    about = "A TCP service that hands out unique integer IDs from a bounded range"
)]
pub struct CliArgs {
    /// Inclusive lower bound of the ID range.
    ///
    /// Environment variable: `SLOTID_MIN`
    #[arg(long, env = "SLOTID_MIN", default_value_t = 0)]
    pub min: u64,

    /// Exclusive upper bound of the ID range.
    ///
    /// Environment variable: `SLOTID_MAX`
    #[arg(short, long, env = "SLOTID_MAX", default_value_t = 2_147_483_647)]
    pub max: u64,

    /// Port to listen on.
    ///
    /// Environment variable: `SLOTID_PORT`
    #[arg(short, long, env = "SLOTID_PORT", default_value_t = 49152)]
    pub port: u16,

    /// Host or interface to listen on.
    ///
    /// Environment variable: `SLOTID_HOST`
    #[arg(long, env = "SLOTID_HOST", default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    /// Redis host (or `redis://` URL) holding the shared allocation bitmap.
    ///
    /// When absent, allocations live in process memory and are lost on exit.
    /// Every instance pointed at the same Redis key shares one ID space.
    ///
    /// Environment variable: `SLOTID_REDIS`
    #[arg(short, long, env = "SLOTID_REDIS")]
    pub redis: Option<String>,

    /// Redis key of the bitmap. The allocation counter is stored under
    /// `<key>-count`.
    ///
    /// Environment variable: `SLOTID_KEY`
    #[arg(short, long, env = "SLOTID_KEY", default_value_t = String::from("slotid"))]
    pub key: String,

    /// Seconds a connection may sit idle between requests before it is
    /// closed.
    ///
    /// Environment variable: `SLOTID_IDLE_TIMEOUT_SECS`
    #[arg(long, env = "SLOTID_IDLE_TIMEOUT_SECS", default_value_t = 10)]
    pub idle_timeout_secs: u64,
}

/// Where allocation state is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Local,
    Redis { host: String, key: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub range: IdRange,
    pub listen_addr: String,
    pub store: StoreConfig,
    pub idle_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.min >= args.max {
            bail!(
                "SLOTID_MIN ({}) must be lower than SLOTID_MAX ({})",
                args.min,
                args.max
            );
        }

        if args.idle_timeout_secs == 0 {
            bail!("SLOTID_IDLE_TIMEOUT_SECS must be greater than 0");
        }

        let range = IdRange::new(args.min, args.max).context("invalid ID range")?;

        let store = match args.redis {
            Some(host) if !host.trim().is_empty() => {
                if args.key.is_empty() {
                    bail!("SLOTID_KEY must not be empty when SLOTID_REDIS is set");
                }
                StoreConfig::Redis {
                    host: host.trim().to_owned(),
                    key: args.key,
                }
            }
            _ => StoreConfig::Local,
        };

        Ok(Self {
            range,
            listen_addr: format!("{}:{}", args.host, args.port),
            store,
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("slotid-server").chain(args.iter().copied()))?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_use_local_store() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.range, IdRange::new(0, 2_147_483_647).unwrap());
        assert_eq!(config.listen_addr, "0.0.0.0:49152");
        assert_eq!(config.store, StoreConfig::Local);
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
    }

    #[test]
    fn redis_flag_selects_shared_store() {
        let config = parse(&["-r", "cache.internal", "-k", "ports", "-p", "7000"]).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Redis {
                host: "cache.internal".into(),
                key: "ports".into()
            }
        );
        assert_eq!(config.listen_addr, "0.0.0.0:7000");
    }

    #[test]
    fn rejects_empty_range() {
        assert!(parse(&["--min", "10", "--max", "10"]).is_err());
        assert!(parse(&["--min", "11", "--max", "10"]).is_err());
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        assert!(parse(&["--idle-timeout-secs", "0"]).is_err());
    }

    #[test]
    fn blank_redis_host_falls_back_to_local() {
        let config = parse(&["--redis", "  "]).unwrap();
        assert_eq!(config.store, StoreConfig::Local);
    }
}
