//! Interactive operator console.
//!
//! ```text
//! add <n>            start n workers on this machine
//! add <n> <host>     start n workers on <host> over ssh
//! add <n> cluster    request n workers from the cluster command
//! remove <id>        retire a ready worker
//! query              membership, progress and the last load report
//! quit               abort the run and shut down
//! ```

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use spin_core::WorkerId;
use spingrid_membership::PlacementHint;

use crate::coordinator::Coordinator;

pub const HELP: &str = "commands:
  add <n> [host|cluster]  start n more workers
  remove <id>             retire a worker
  query                   show workers, progress and load
  quit                    abort the run and shut down
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { count: usize, hint: PlacementHint },
    Remove(WorkerId),
    Query,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Command::Empty;
        };
        let args: Vec<&str> = words.collect();
        match (verb, args.as_slice()) {
            ("add", [n]) => match n.parse() {
                Ok(count) => Command::Add {
                    count,
                    hint: PlacementHint::Local,
                },
                Err(_) => Command::Unknown(line.trim().to_string()),
            },
            ("add", [n, target]) => match n.parse() {
                Ok(count) => Command::Add {
                    count,
                    hint: match *target {
                        "cluster" => PlacementHint::Cluster,
                        "local" => PlacementHint::Local,
                        host => PlacementHint::Host(host.to_string()),
                    },
                },
                Err(_) => Command::Unknown(line.trim().to_string()),
            },
            ("remove", [id]) => Command::Remove(WorkerId::from(*id)),
            ("query", []) => Command::Query,
            ("quit" | "exit", []) => Command::Quit,
            ("help" | "?", _) => Command::Help,
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

/// Spawn a thread forwarding stdin lines to a channel. The thread ends at
/// EOF or when the receiver is dropped.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines().map_while(Result::ok) {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Serve commands until `quit`, end of input, or shutdown.
pub async fn run<W>(
    coordinator: Arc<Coordinator>,
    mut lines: mpsc::Receiver<String>,
    mut out: W,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    info!("console ready; type 'help' for commands");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let line = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let command = Command::parse(&line);
        debug!(?command, "console command");
        let reply = match command {
            Command::Empty => continue,
            Command::Add { count, hint } => {
                coordinator.grow(count, hint.clone());
                format!("requested {count} worker(s) ({hint:?})\n")
            }
            Command::Remove(id) => match coordinator.retire(&id).await {
                Ok(()) => format!("retired {id}\n"),
                Err(e) => format!("error: {e:#}\n"),
            },
            Command::Query => {
                let status = coordinator.query().await;
                format!("{status}\n")
            }
            Command::Quit => {
                coordinator.dispatcher().abort();
                out.write_all(b"stopping\n").await?;
                out.flush().await?;
                break;
            }
            Command::Help => HELP.to_string(),
            Command::Unknown(text) => format!("unknown command '{text}'\n{HELP}"),
        };
        out.write_all(reply.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_variants() {
        assert_eq!(
            Command::parse("add 3"),
            Command::Add {
                count: 3,
                hint: PlacementHint::Local
            }
        );
        assert_eq!(
            Command::parse("  add 2 node7 "),
            Command::Add {
                count: 2,
                hint: PlacementHint::Host("node7".into())
            }
        );
        assert_eq!(
            Command::parse("add 8 cluster"),
            Command::Add {
                count: 8,
                hint: PlacementHint::Cluster
            }
        );
    }

    #[test]
    fn parses_other_commands() {
        assert_eq!(Command::parse("remove w-1"), Command::Remove(WorkerId::from("w-1")));
        assert_eq!(Command::parse("query"), Command::Query);
        assert_eq!(Command::parse("quit"), Command::Quit);
        assert_eq!(Command::parse("help"), Command::Help);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Command::parse("add many"), Command::Unknown("add many".into()));
        assert_eq!(Command::parse("remove"), Command::Unknown("remove".into()));
        assert_eq!(Command::parse("query now"), Command::Unknown("query now".into()));
        assert_eq!(Command::parse("launch"), Command::Unknown("launch".into()));
    }
}
