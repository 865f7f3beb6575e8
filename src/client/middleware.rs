//! # Client Middleware
//!
//! The command dispatcher that sits in front of [`ClientCore`]. It reads one
//! command per line and runs each one as its own tokio task, so a slow write
//! never holds up the next line.
//!
//! ## Commands
//!
//! | Line | Action | Output on success |
//! |---|---|---|
//! | `0` | register a mailbox of the configured size | `<index> <hex address>` |
//! | `1 <index> <hex payload>` | write the payload into mailbox `<index>` | `<index> ok` |
//!
//! Blank lines are skipped. A line that does not parse prints
//! `error: <reason>` and the loop moves on. A failed operation prints
//! `<op> <index|-> failed: <error>`; it never stops the loop.
//!
//! At end of input the dispatcher waits for every in-flight operation, prints
//! its outcome and returns a [`DispatchSummary`].

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{error, info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinError, JoinSet};

use crate::client::client::ClientCore;
use crate::client::metrics::{ClientMetrics, OperationKind};
use crate::client::registry::Mailbox;
use crate::common::connection::Dialer;
use crate::common::error::ClientError;
use crate::engine::ShareEngine;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewMailbox,
    Write { local_index: u32, payload: Vec<u8> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),

    #[error("opcode {opcode} takes {expected} argument(s), got {got}")]
    WrongArity {
        opcode: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid mailbox index {0:?}")]
    BadIndex(String),

    #[error("invalid hex payload: {0}")]
    BadHex(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.split_whitespace();
        let opcode = fields.next().ok_or(CommandError::Empty)?;
        let args: Vec<&str> = fields.collect();

        match opcode {
            "0" => {
                if !args.is_empty() {
                    return Err(CommandError::WrongArity {
                        opcode: "0",
                        expected: 0,
                        got: args.len(),
                    });
                }
                Ok(Command::NewMailbox)
            }
            "1" => {
                let [index, payload] = args[..] else {
                    return Err(CommandError::WrongArity {
                        opcode: "1",
                        expected: 2,
                        got: args.len(),
                    });
                };
                let local_index = index
                    .parse::<u32>()
                    .map_err(|_| CommandError::BadIndex(index.to_string()))?;
                let payload =
                    hex::decode(payload).map_err(|e| CommandError::BadHex(e.to_string()))?;
                Ok(Command::Write {
                    local_index,
                    payload,
                })
            }
            other => Err(CommandError::UnknownOpcode(other.to_string())),
        }
    }
}

/// Counts reported when input is exhausted and every operation has finished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub registered: usize,
    pub written: usize,
    pub failed: usize,
    pub malformed: usize,
}

/// What a spawned operation came back with.
enum Outcome {
    Registered(Mailbox),
    Written(u32),
    Failed {
        operation: OperationKind,
        local_index: Option<u32>,
        error: ClientError,
    },
}

/// Line-oriented front end for a shared [`ClientCore`].
pub struct ClientMiddleware<D, E> {
    core: Arc<ClientCore<D, E>>,
    /// Size used for every `0` command
    data_size: u32,
    metrics: Option<Arc<Mutex<ClientMetrics>>>,
}

impl<D, E> ClientMiddleware<D, E>
where
    D: Dialer,
    E: ShareEngine,
{
    /// Creates a dispatcher over a shared core.
    ///
    /// # Arguments
    ///
    /// * `core` - Protocol orchestrator every spawned command runs against
    /// * `data_size` - Size of the mailbox a `0` command registers
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let middleware = ClientMiddleware::new(Arc::new(core), 1024)
    ///     .with_metrics(metrics.clone());
    /// ```
    pub fn new(core: Arc<ClientCore<D, E>>, data_size: u32) -> Self {
        Self {
            core,
            data_size,
            metrics: None,
        }
    }

    /// Enable metrics collection for this middleware.
    pub fn with_metrics(mut self, metrics: Arc<Mutex<ClientMetrics>>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Read commands from `input` until it ends, writing one result line per
    /// command to `output`.
    ///
    /// Only I/O errors on `input` or `output` end the loop early.
    ///
    /// # Arguments
    ///
    /// * `input` - Command lines (`0` or `1 <local_index> <hex payload>`)
    /// * `output` - Receives one result or error line per command
    ///
    /// # Returns
    ///
    /// * `Ok(DispatchSummary)` - Counts once every spawned command finished
    /// * `Err(io::Error)` - Reading `input` or writing `output` failed
    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<DispatchSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut summary = DispatchSummary::default();
        let mut input_open = true;

        info!(
            "{} ready for commands (data size {})",
            self.core.client_name(),
            self.data_size
        );

        loop {
            tokio::select! {
                line = lines.next_line(), if input_open => {
                    match line? {
                        Some(line) if line.trim().is_empty() => {}
                        Some(line) => match line.parse::<Command>() {
                            Ok(command) => self.spawn_command(&mut tasks, command),
                            Err(e) => {
                                warn!("Rejected command {:?}: {}", line, e);
                                summary.malformed += 1;
                                write_line(&mut output, &format!("error: {}", e)).await?;
                            }
                        },
                        None => {
                            input_open = false;
                            if !tasks.is_empty() {
                                info!("Input closed, waiting for {} operation(s)", tasks.len());
                            }
                        }
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let line = report(joined, &mut summary);
                    write_line(&mut output, &line).await?;
                }
                else => break,
            }
        }

        info!(
            "{} done: {} registered, {} written, {} failed, {} malformed",
            self.core.client_name(),
            summary.registered,
            summary.written,
            summary.failed,
            summary.malformed
        );
        Ok(summary)
    }

    fn spawn_command(&self, tasks: &mut JoinSet<Outcome>, command: Command) {
        let core = self.core.clone();
        let metrics = self.metrics.clone();
        let data_size = self.data_size;

        tasks.spawn(async move {
            let started = Instant::now();
            let outcome = match command {
                Command::NewMailbox => match core.register_mailbox(data_size).await {
                    Ok(mailbox) => Outcome::Registered(mailbox),
                    Err(error) => Outcome::Failed {
                        operation: OperationKind::Register,
                        local_index: None,
                        error,
                    },
                },
                Command::Write {
                    local_index,
                    payload,
                } => match core.write_mailbox(local_index, &payload).await {
                    Ok(()) => Outcome::Written(local_index),
                    Err(error) => Outcome::Failed {
                        operation: OperationKind::Write,
                        local_index: Some(local_index),
                        error,
                    },
                },
            };

            if let Some(metrics) = metrics {
                let (operation, local_index, success, reason) = match &outcome {
                    Outcome::Registered(mailbox) => {
                        (OperationKind::Register, Some(mailbox.local_index), true, None)
                    }
                    Outcome::Written(index) => (OperationKind::Write, Some(*index), true, None),
                    Outcome::Failed {
                        operation,
                        local_index,
                        error,
                    } => (*operation, *local_index, false, Some(error.kind().to_string())),
                };
                metrics
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .record_operation(operation, local_index, started.elapsed(), success, reason);
            }

            outcome
        });
    }
}

/// Turn a finished task into its output line and count it.
fn report(joined: Result<Outcome, JoinError>, summary: &mut DispatchSummary) -> String {
    match joined {
        Ok(Outcome::Registered(mailbox)) => {
            summary.registered += 1;
            format!("{} {}", mailbox.local_index, mailbox.address_hex())
        }
        Ok(Outcome::Written(local_index)) => {
            summary.written += 1;
            format!("{} ok", local_index)
        }
        Ok(Outcome::Failed {
            operation,
            local_index,
            error,
        }) => {
            summary.failed += 1;
            let op = match operation {
                OperationKind::Register => "register",
                OperationKind::Write => "write",
            };
            let index = local_index.map_or_else(|| "-".to_string(), |i| i.to_string());
            error!("❌ {} {} failed: {}", op, index, error);
            format!("{} {} failed: {}", op, index, error)
        }
        Err(e) => {
            summary.failed += 1;
            error!("❌ operation task aborted: {}", e);
            format!("error: operation task aborted: {}", e)
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> std::io::Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_new_mailbox() {
        assert_eq!("0".parse::<Command>(), Ok(Command::NewMailbox));
        assert_eq!("  0  ".parse::<Command>(), Ok(Command::NewMailbox));
    }

    #[test]
    fn test_parse_write() {
        assert_eq!(
            "1 7 deadBEEF".parse::<Command>(),
            Ok(Command::Write {
                local_index: 7,
                payload: vec![0xde, 0xad, 0xbe, 0xef],
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "2".parse::<Command>(),
            Err(CommandError::UnknownOpcode("2".to_string()))
        );
        assert_eq!(
            "0 1".parse::<Command>(),
            Err(CommandError::WrongArity {
                opcode: "0",
                expected: 0,
                got: 1
            })
        );
        assert_eq!(
            "1 3".parse::<Command>(),
            Err(CommandError::WrongArity {
                opcode: "1",
                expected: 2,
                got: 1
            })
        );
        assert_eq!(
            "1 -4 00".parse::<Command>(),
            Err(CommandError::BadIndex("-4".to_string()))
        );
        assert!(matches!(
            "1 4 abc".parse::<Command>(),
            Err(CommandError::BadHex(_))
        ));
        assert!(matches!(
            "1 4 zz".parse::<Command>(),
            Err(CommandError::BadHex(_))
        ));
    }

    #[test]
    fn test_report_formats() {
        let mut summary = DispatchSummary::default();
        let mailbox = Mailbox {
            local_index: 2,
            virtual_address: [0xab; 16],
            data_size: 8,
        };

        assert_eq!(
            report(Ok(Outcome::Registered(mailbox)), &mut summary),
            format!("2 {}", "ab".repeat(16))
        );
        assert_eq!(report(Ok(Outcome::Written(2)), &mut summary), "2 ok");
        assert_eq!(
            report(
                Ok(Outcome::Failed {
                    operation: OperationKind::Write,
                    local_index: Some(9),
                    error: ClientError::UnknownMailbox(9),
                }),
                &mut summary
            ),
            format!("write 9 failed: {}", ClientError::UnknownMailbox(9))
        );
        assert!(report(
            Ok(Outcome::Failed {
                operation: OperationKind::Register,
                local_index: None,
                error: ClientError::SlotPoolClosed,
            }),
            &mut summary
        )
        .starts_with("register - failed: "));

        assert_eq!(
            summary,
            DispatchSummary {
                registered: 1,
                written: 1,
                failed: 2,
                malformed: 0,
            }
        );
    }
}
