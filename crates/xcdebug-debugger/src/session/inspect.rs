use super::observed::Observed;
use super::transport::Until;
use super::{DebuggerSession, quote};
use crate::detector::{CrashReport, StopInfo};
use crate::parse::{self, ThreadBacktrace, ThreadInfo, Variable};
use crate::protocol::CommandResult;
use crate::state::SessionState;

/// Stack frames of the target's threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backtrace {
    /// Parsed frames, per thread.
    pub threads: Vec<ThreadBacktrace>,

    /// Output of the debugger.
    pub output: String,
}

/// Display format of [read_memory](DebuggerSession::read_memory).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryFormat {
    /// Hexadecimal.
    #[default]
    Hex,

    /// Signed decimal.
    Decimal,

    /// Unsigned decimal.
    Unsigned,

    /// Characters.
    Char,

    /// Binary.
    Binary,

    /// Floating point.
    Float,

    /// Hexadecimal bytes with ASCII.
    Bytes,

    /// Disassembled instructions.
    Instruction,
}

impl MemoryFormat {
    const fn letter(self) -> char {
        match self {
            Self::Hex => 'x',
            Self::Decimal => 'd',
            Self::Unsigned => 'u',
            Self::Char => 'c',
            Self::Binary => 'b',
            Self::Float => 'f',
            Self::Bytes => 'Y',
            Self::Instruction => 'i',
        }
    }
}

/// UI framework of the target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// UIKit.
    Ios,

    /// AppKit.
    MacOs,
}

/// Symbol lookup query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolQuery {
    /// Symbolicates an address.
    Address(u64),

    /// Looks up a function or symbol by name.
    Name(String),

    /// Looks up a type by name.
    Type(String),
}

impl SymbolQuery {
    /// Builds a query from optional criteria, the address taking
    /// precedence over the name, itself taking precedence over the type.
    pub fn from_options(
        address: Option<u64>,
        name: Option<String>,
        ty: Option<String>,
    ) -> crate::Result<Self> {
        match (address, name, ty) {
            (Some(address), _, _) => Ok(Self::Address(address)),
            (None, Some(name), _) if !name.is_empty() => Ok(Self::Name(name)),
            (None, _, Some(ty)) if !ty.is_empty() => Ok(Self::Type(ty)),
            _ => Err(crate::Error::InvalidParams(
                "one of address, name or type is required".to_owned(),
            )),
        }
    }

    fn command(&self) -> String {
        match self {
            Self::Address(address) => format!("image lookup --address {address:#x}"),
            Self::Name(name) => format!("image lookup --name {}", quote(name)),
            Self::Type(ty) => format!("image lookup --type {}", quote(ty)),
        }
    }
}

/// View hierarchy of the target application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewHierarchy {
    /// Recursive description of the views.
    pub description: String,

    /// Layout constraints affecting the view, if requested.
    pub constraints: Option<String>,
}

/// Status of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Process ID of the target.
    pub pid: u64,

    /// Last observed state.
    pub state: SessionState,

    /// Last non-fatal stop, if any.
    pub last_stop: Option<StopInfo>,

    /// Crash, if any.
    pub crash: Option<CrashReport>,

    /// Exit status, if exited.
    pub exit_code: Option<i32>,

    /// Output of the debugger, unless the session already ended.
    pub output: Option<String>,
}

impl DebuggerSession {
    /// Returns the stack frames of one thread (by index), or of every
    /// thread.
    ///
    /// This is available for crashed targets as well.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn get_stack(&self, thread: Option<u32>) -> crate::Result<Backtrace> {
        let mut inner = self.lock(Observed::require_inspectable).await?;

        let command = match thread {
            Some(index) => format!("thread backtrace {index}"),
            None => "thread backtrace all".to_owned(),
        };

        let result = inner
            .transport
            .exchange(&command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(&command)?;

        Ok(Backtrace {
            threads: parse::parse_backtrace(&result.output),
            output: result.output,
        })
    }

    /// Returns the threads of the target, after selecting the one with the
    /// given index, if any.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn list_threads(&self, select: Option<u32>) -> crate::Result<Vec<ThreadInfo>> {
        let mut inner = self.lock(Observed::require_stopped).await?;
        let timeout = self.config.command_timeout;

        if let Some(index) = select {
            let command = format!("thread select {index}");
            inner
                .transport
                .exchange(&command, Until::Sentinel, timeout)
                .await?
                .into_checked(&command)?;
        }

        let command = "thread list";
        let result = inner
            .transport
            .exchange(command, Until::Sentinel, timeout)
            .await?
            .into_checked(command)?;

        Ok(parse::parse_thread_list(&result.output))
    }

    /// Returns the variables of a frame of the selected thread.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn get_variables(&self, frame: u32) -> crate::Result<Vec<Variable>> {
        let mut inner = self.lock(Observed::require_stopped).await?;
        let timeout = self.config.command_timeout;

        let command = format!("frame select {frame}");
        inner
            .transport
            .exchange(&command, Until::Sentinel, timeout)
            .await?
            .into_checked(&command)?;

        let command = "frame variable";
        let result = inner
            .transport
            .exchange(command, Until::Sentinel, timeout)
            .await?
            .into_checked(command)?;

        Ok(parse::parse_variables(&result.output))
    }

    /// Evaluates an expression in the selected frame.
    ///
    /// If `object_description` is set, the result is printed through its
    /// object description (as with `po`).
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn evaluate(
        &self,
        expression: &str,
        language: Option<&str>,
        object_description: bool,
    ) -> crate::Result<CommandResult> {
        if expression.trim().is_empty() {
            return Err(crate::Error::InvalidParams("empty expression".to_owned()));
        }

        let mut command = "expression".to_owned();

        if let Some(language) = language {
            let valid = !language.is_empty()
                && language
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-'));
            if !valid {
                return Err(crate::Error::InvalidParams(format!(
                    "invalid language `{language}`"
                )));
            }

            command.push_str(" -l ");
            command.push_str(language);
        }

        if object_description {
            command.push_str(" -O");
        }

        command.push_str(" -- ");
        command.push_str(expression);

        let mut inner = self.lock(Observed::require_stopped).await?;

        inner
            .transport
            .exchange(&command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(&command)
    }

    /// Reads `count` items of `size` bytes at `address`.
    ///
    /// This is available for crashed targets as well.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn read_memory(
        &self,
        address: u64,
        count: usize,
        format: MemoryFormat,
        size: usize,
    ) -> crate::Result<CommandResult> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(crate::Error::InvalidParams(format!(
                "invalid item size {size} (expected 1, 2, 4 or 8)"
            )));
        }
        if count == 0 {
            return Err(crate::Error::InvalidParams(
                "at least one item must be read".to_owned(),
            ));
        }

        let command = format!(
            "memory read --count {count} --format {} --size {size} {address:#x}",
            format.letter()
        );

        let mut inner = self.lock(Observed::require_inspectable).await?;

        inner
            .transport
            .exchange(&command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(&command)
    }

    /// Looks up symbols, addresses or types in the target's images.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn symbol_lookup(&self, query: SymbolQuery) -> crate::Result<CommandResult> {
        let command = query.command();
        let mut inner = self.lock(Observed::require_alive).await?;

        inner
            .transport
            .exchange(&command, Until::Sentinel, self.config.command_timeout)
            .await?
            .into_checked(&command)
    }

    /// Describes the view hierarchy of the key window, or of the view at
    /// `address`.
    ///
    /// Layout constraints can only be requested for a given view.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn view_hierarchy(
        &self,
        platform: Platform,
        address: Option<u64>,
        constraints: bool,
    ) -> crate::Result<ViewHierarchy> {
        let description = match (platform, address) {
            (Platform::Ios, None) => {
                "[[[UIApplication sharedApplication] keyWindow] recursiveDescription]".to_owned()
            }
            (Platform::Ios, Some(address)) => {
                format!("[(UIView *){address:#x} recursiveDescription]")
            }
            (Platform::MacOs, None) => {
                "[[[[NSApplication sharedApplication] keyWindow] contentView] _subtreeDescription]"
                    .to_owned()
            }
            (Platform::MacOs, Some(address)) => {
                format!("[(NSView *){address:#x} _subtreeDescription]")
            }
        };

        let constraints = match (constraints, address) {
            (false, _) => None,
            (true, None) => {
                return Err(crate::Error::InvalidParams(
                    "constraints require a view address".to_owned(),
                ));
            }
            (true, Some(address)) => Some(match platform {
                Platform::Ios => [0, 1].map(|axis| {
                    format!("[(UIView *){address:#x} constraintsAffectingLayoutForAxis:{axis}]")
                }),
                Platform::MacOs => [0, 1].map(|orientation| {
                    format!(
                        "[(NSView *){address:#x} constraintsAffectingLayoutForOrientation:{orientation}]"
                    )
                }),
            }),
        };

        let mut inner = self.lock(Observed::require_stopped).await?;
        let timeout = self.config.command_timeout;

        let command = format!("expression -l objc -O -- {description}");
        let description = inner
            .transport
            .exchange(&command, Until::Sentinel, timeout)
            .await?
            .into_checked(&command)?
            .output;

        let constraints = match constraints {
            Some([horizontal, vertical]) => {
                let mut outputs = Vec::with_capacity(2);

                for expression in [horizontal, vertical] {
                    let command = format!("expression -l objc -O -- {expression}");
                    let output = inner
                        .transport
                        .exchange(&command, Until::Sentinel, timeout)
                        .await?
                        .into_checked(&command)?
                        .output;
                    outputs.push(output);
                }

                Some(format!(
                    "horizontal:\n{}\nvertical:\n{}",
                    outputs[0], outputs[1]
                ))
            }
            None => None,
        };

        Ok(ViewHierarchy {
            description,
            constraints,
        })
    }

    /// Returns the status of the target.
    ///
    /// Once the session ended, the last observed status is returned.
    #[tracing::instrument(name = "Exec", skip(self), fields(pid = self.pid))]
    pub async fn process_status(&self) -> crate::Result<ProcessStatus> {
        let output = if self.state().is_terminal() {
            None
        } else {
            let mut inner = self.inner.lock().await;

            match inner
                .transport
                .exchange("process status", Until::Sentinel, self.config.command_timeout)
                .await
            {
                Ok(result) => Some(result.output),
                Err(_) if self.state().is_terminal() => None,
                Err(e) => return Err(e),
            }
        };

        let observed = self.observed.borrow().clone();

        Ok(ProcessStatus {
            pid: self.pid,
            state: observed.state,
            last_stop: observed.last_stop,
            crash: observed.crash,
            exit_code: observed.exit_code,
            output,
        })
    }
}
