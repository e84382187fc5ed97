use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

use sofa::ClientConfig;
use sofa_api::{FeedOptions, FeedType, Seq};

pub const USAGE: &str = "\
Usage: sofa-tail [OPTIONS] <database>

Follow the _changes feed of a CouchDB database and print each change.

Options:
  -c, --config <path>      YAML client config (default: ~/.config/sofa/config.yaml)
  -u, --url <url>          Server URL, overrides config and COUCHDB_URL
  -f, --feed <type>        normal | longpoll | continuous (default: continuous)
  -s, --since <seq>        Start sequence; `0` for the whole history (default: now)
      --heartbeat <ms>     Heartbeat interval for streaming feeds
      --limit <n>          Stop after n changes
      --filter <ddoc/name> Server-side filter function
      --include-docs       Include document bodies
      --descending         Newest changes first
      --json               Print each change as a JSON line
  -h, --help               Show this help";

/// Command line of `sofa-tail`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TailArgs {
    pub database: String,
    pub config: Option<PathBuf>,
    pub url: Option<String>,
    pub feed: FeedType,
    pub since: Option<Seq>,
    pub heartbeat_ms: Option<u64>,
    pub limit: Option<u64>,
    pub filter: Option<String>,
    pub include_docs: bool,
    pub descending: bool,
    pub json: bool,
    pub help: bool,
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next().ok_or_else(|| anyhow!("{} requires a value", flag))
}

fn number(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<u64> {
    let raw = value(args, flag)?;
    raw.parse()
        .map_err(|e| anyhow!("{} expects a number, got '{}': {}", flag, raw, e))
}

impl TailArgs {
    /// Parse arguments (without the program name)
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = TailArgs::default();
        let mut args = args.into_iter();
        let mut database = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => parsed.help = true,
                "-c" | "--config" => parsed.config = Some(PathBuf::from(value(&mut args, &arg)?)),
                "-u" | "--url" => parsed.url = Some(value(&mut args, &arg)?),
                "-f" | "--feed" => parsed.feed = value(&mut args, &arg)?.parse()?,
                "-s" | "--since" => parsed.since = Some(parse_seq(&value(&mut args, &arg)?)),
                "--heartbeat" => parsed.heartbeat_ms = Some(number(&mut args, &arg)?),
                "--limit" => parsed.limit = Some(number(&mut args, &arg)?),
                "--filter" => parsed.filter = Some(value(&mut args, &arg)?),
                "--include-docs" => parsed.include_docs = true,
                "--descending" => parsed.descending = true,
                "--json" => parsed.json = true,
                flag if flag.starts_with('-') => bail!("unknown option '{}'\n\n{}", flag, USAGE),
                _ => {
                    if database.replace(arg.clone()).is_some() {
                        bail!("only one database may be given\n\n{}", USAGE);
                    }
                }
            }
        }

        if !parsed.help {
            parsed.database = database.ok_or_else(|| anyhow!("missing <database>\n\n{}", USAGE))?;
        }
        Ok(parsed)
    }

    /// Feed options for this command line, using the config's heartbeat unless one was given
    pub fn feed_options(&self, config: &ClientConfig) -> FeedOptions {
        let mut options = FeedOptions::new()
            .with_feed(self.feed)
            .with_heartbeat(Some(self.heartbeat_ms.unwrap_or(config.heartbeat_ms)))
            .with_include_docs(self.include_docs)
            .with_descending(self.descending);
        if let Some(since) = &self.since {
            options = options.with_since(since.clone());
        }
        if let Some(limit) = self.limit {
            options = options.with_limit(limit);
        }
        if let Some(filter) = &self.filter {
            options = options.with_filter(filter.clone());
        }
        options
    }
}

/// Numeric sequences stay numbers so `since=0` is sent as such
fn parse_seq(raw: &str) -> Seq {
    match raw.parse::<u64>() {
        Ok(n) => Seq::from(n),
        Err(_) => Seq::from(raw),
    }
}
