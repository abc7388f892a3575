use miette::IntoDiagnostic;
use tokio::io::{AsyncBufReadExt, BufReader};
use xcdebug_debugger::{
    BreakpointLocation, DebuggerSession, MemoryFormat, StepMode, SymbolQuery, WatchKind,
    WatchTarget, WatchpointAction,
};

/// Interactive command, as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// `bt [THREAD]`
    Backtrace(Option<u32>),

    /// `threads`
    Threads,

    /// `vars [FRAME]`
    Variables(u32),

    /// `p EXPR`
    Print(String),

    /// `po EXPR`
    PrintObject(String),

    /// `c`
    Continue,

    /// `interrupt`
    Interrupt,

    /// `s`, `n`, `finish` or `si`
    Step(StepMode),

    /// `b SYMBOL` or `b FILE:LINE`
    Break(BreakpointLocation),

    /// `delete ID`
    Delete(u32),

    /// `watch VAR`
    Watch(String),

    /// `mem ADDR [COUNT]`
    Memory {
        /// Address to read at.
        address: u64,

        /// Number of 8-byte words to read.
        count: usize,
    },

    /// `lookup NAME|ADDR`
    Lookup(SymbolQuery),

    /// `status`
    Status,

    /// `crash`
    Crash,

    /// `detach`
    Detach,

    /// `quit`
    Quit,

    /// Anything else, passed verbatim to the debugger.
    Raw(String),
}

/// Error of a malformed interactive command.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("{command}: {message}")]
pub struct ReplError {
    command: &'static str,
    message: String,
}

impl ReplError {
    fn new(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            command,
            message: message.into(),
        }
    }
}

impl ReplCommand {
    /// Parses an interactive command.
    ///
    /// Returns `None` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, ReplError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));

        let command = match word {
            "bt" => Self::Backtrace(optional_number("bt", rest)?),
            "threads" => Self::Threads,
            "vars" => Self::Variables(optional_number("vars", rest)?.unwrap_or(0)),
            "p" => Self::Print(required("p", rest, "expression")?),
            "po" => Self::PrintObject(required("po", rest, "expression")?),
            "c" => Self::Continue,
            "interrupt" => Self::Interrupt,
            "s" => Self::Step(StepMode::Into),
            "n" => Self::Step(StepMode::Over),
            "finish" => Self::Step(StepMode::Out),
            "si" => Self::Step(StepMode::Instruction),
            "b" => Self::Break(location(&required("b", rest, "location")?)),
            "delete" => Self::Delete(number("delete", rest)?),
            "watch" => Self::Watch(required("watch", rest, "variable")?),
            "mem" => {
                let (address, count) = rest
                    .split_once(char::is_whitespace)
                    .map_or((rest, ""), |(address, count)| (address, count.trim()));

                Self::Memory {
                    address: address_of("mem", address)?,
                    count: optional_number("mem", count)?.map_or(8, |count: u32| count as usize),
                }
            }
            "lookup" => {
                let target = required("lookup", rest, "symbol or address")?;
                match parse_hex(&target) {
                    Some(address) => Self::Lookup(SymbolQuery::Address(address)),
                    None => Self::Lookup(SymbolQuery::Name(target)),
                }
            }
            "status" => Self::Status,
            "crash" => Self::Crash,
            "detach" => Self::Detach,
            "quit" | "q" => Self::Quit,
            _ => Self::Raw(line.to_owned()),
        };

        Ok(Some(command))
    }
}

fn required(command: &'static str, rest: &str, what: &str) -> Result<String, ReplError> {
    if rest.is_empty() {
        Err(ReplError::new(command, format!("missing {what}")))
    } else {
        Ok(rest.to_owned())
    }
}

fn number(command: &'static str, rest: &str) -> Result<u32, ReplError> {
    optional_number(command, rest)?.ok_or_else(|| ReplError::new(command, "missing number"))
}

fn optional_number(command: &'static str, rest: &str) -> Result<Option<u32>, ReplError> {
    if rest.is_empty() {
        return Ok(None);
    }

    rest.parse()
        .map(Some)
        .map_err(|_| ReplError::new(command, format!("invalid number `{rest}`")))
}

fn address_of(command: &'static str, rest: &str) -> Result<u64, ReplError> {
    parse_hex(rest)
        .or_else(|| rest.parse().ok())
        .ok_or_else(|| ReplError::new(command, format!("invalid address `{rest}`")))
}

fn parse_hex(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

/// `FILE:LINE` if it ends with a line number, a symbol otherwise.
fn location(spec: &str) -> BreakpointLocation {
    match spec.rsplit_once(':') {
        Some((file, line)) if !file.is_empty() => match line.parse() {
            Ok(line) => BreakpointLocation::file_line(file, line),
            Err(_) => BreakpointLocation::symbol(spec),
        },
        _ => BreakpointLocation::symbol(spec),
    }
}

/// What ending the interactive session does to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnQuit {
    /// The target keeps running.
    Detach,

    /// The target is killed.
    Terminate,
}

/// Runs interactive commands read from the standard input against
/// `session`, until `detach` or `quit` is read or the input ends.
pub async fn run(session: &DebuggerSession, on_quit: OnQuit) -> miette::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("(xcdebug) ");

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                // interrupts the target, not the session
                report(session.interrupt().await.map(|result| result.output));
                continue;
            }
        };

        let Ok(Some(line)) = line else {
            break;
        };

        let command = match ReplCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        match command {
            ReplCommand::Detach => return session.detach().await.into_diagnostic(),
            ReplCommand::Quit => break,
            command => report(execute(session, command).await),
        }
    }

    let ended = match on_quit {
        OnQuit::Detach => session.detach().await,
        OnQuit::Terminate => session.terminate().await,
    };

    ended.into_diagnostic()
}

fn report(result: xcdebug_debugger::Result<String>) {
    match result {
        Ok(output) if output.is_empty() => (),
        Ok(output) => println!("{output}"),
        Err(e) => eprintln!("error: {e}"),
    }
}

async fn execute(
    session: &DebuggerSession,
    command: ReplCommand,
) -> xcdebug_debugger::Result<String> {
    let output = match command {
        ReplCommand::Backtrace(thread) => session.get_stack(thread).await?.output,
        ReplCommand::Threads => session
            .list_threads(None)
            .await?
            .iter()
            .map(|thread| {
                let mut line = format!(
                    "{} thread #{}",
                    if thread.selected { '*' } else { ' ' },
                    thread.index
                );
                if let Some(tid) = thread.tid {
                    line.push_str(&format!(" tid={tid:#x}"));
                }
                if let Some(name) = thread.name.as_deref().or(thread.queue.as_deref()) {
                    line.push_str(&format!(" '{name}'"));
                }
                if let Some(reason) = &thread.stop_reason {
                    line.push_str(&format!(" ({reason})"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ReplCommand::Variables(frame) => session
            .get_variables(frame)
            .await?
            .iter()
            .map(|var| format!("({}) {} = {}", var.ty, var.name, var.value))
            .collect::<Vec<_>>()
            .join("\n"),
        ReplCommand::Print(expression) => session.evaluate(&expression, None, false).await?.output,
        ReplCommand::PrintObject(expression) => {
            session.evaluate(&expression, None, true).await?.output
        }
        ReplCommand::Continue => session.continue_execution().await?.output,
        ReplCommand::Interrupt => session.interrupt().await?.output,
        ReplCommand::Step(mode) => session.step(mode).await?.output,
        ReplCommand::Break(location) => {
            let id = session.set_breakpoint(location).await?;
            format!("breakpoint {id} set")
        }
        ReplCommand::Delete(id) => {
            session.delete_breakpoint(id).await?;
            format!("breakpoint {id} deleted")
        }
        ReplCommand::Watch(variable) => {
            let result = session
                .manage_watchpoint(WatchpointAction::Add {
                    target: WatchTarget::Variable(variable),
                    kind: WatchKind::Write,
                    condition: None,
                })
                .await?;
            result.result.output
        }
        ReplCommand::Memory { address, count } => {
            session
                .read_memory(address, count, MemoryFormat::Hex, 8)
                .await?
                .output
        }
        ReplCommand::Lookup(query) => session.symbol_lookup(query).await?.output,
        ReplCommand::Status => {
            let status = session.process_status().await?;
            status
                .output
                .unwrap_or_else(|| format!("process {} is {}", status.pid, status.state))
        }
        ReplCommand::Crash => match session.crash_warning() {
            Some(crash) => format!("process {} crashed: {}", session.pid(), crash.reason),
            None => "no crash".to_owned(),
        },
        ReplCommand::Raw(raw) => session.execute(&raw).await?.output,
        ReplCommand::Detach | ReplCommand::Quit => String::new(),
    };

    Ok(output)
}
