use std::collections::BTreeMap;
use std::path::PathBuf;

/// A process builder, describing either the debugger subprocess to spawn or
/// the target program the debugger should launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Program to spawn.
    pub program: PathBuf,

    /// Program arguments.
    pub args: Vec<String>,

    /// Environment variables of the process.
    pub env: CommandEnv,

    /// Working directory of the process.
    pub current_dir: Option<PathBuf>,
}

impl Command {
    /// Constructs a new `Command` for the program at path `program`, with
    /// the following default configuration:
    ///
    /// * No arguments to the program
    /// * Inherit the current process's environment
    /// * Inherit the current process's working directory
    ///
    /// If `program` is not an absolute path, the `PATH` will be searched in
    /// an OS-defined way.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: CommandEnv::Inherit(BTreeMap::new()),
            current_dir: None,
        }
    }

    /// Adds an argument to pass to the program.
    ///
    /// To pass multiple arguments see [`args`](Self::args).
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to pass to the program.
    ///
    /// To pass a single argument see [`arg`](Self::arg).
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// Inserts or updates an explicit environment variable mapping.
    ///
    /// Environment variables explicitly set using [`env`](Self::env) take
    /// precedence over inherited variables. Inheritance can be disabled
    /// entirely using [`env_clear`](Self::env_clear) or for a single key
    /// using [`env_remove`](Self::env_remove).
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        match self.env {
            CommandEnv::Inherit(ref mut env) => {
                env.insert(key.into(), Some(val.into()));
            }
            CommandEnv::NoInherit(ref mut env) => {
                env.insert(key.into(), val.into());
            }
        }

        self
    }

    /// Inserts or updates multiple explicit environment variable mappings.
    pub fn envs<I, K, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        vars.into_iter().fold(self, |cmd, (k, v)| cmd.env(k, v))
    }

    /// Removes an explicitly set environment variable and prevents inheriting
    /// it from the parent process.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        match self.env {
            CommandEnv::Inherit(ref mut env) => {
                env.insert(key.into(), None);
            }
            CommandEnv::NoInherit(ref mut env) => {
                env.remove(&key.into());
            }
        }

        self
    }

    /// Clears all explicitly set environment variables and prevents
    /// inheriting any parent process environment variables.
    pub fn env_clear(mut self) -> Self {
        self.env = CommandEnv::NoInherit(BTreeMap::new());
        self
    }

    /// Sets the working directory of the process.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Converts this command into a subprocess builder.
    pub(crate) fn to_process(&self) -> tokio::process::Command {
        let mut process = tokio::process::Command::new(&self.program);
        process.args(&self.args);

        match &self.env {
            CommandEnv::Inherit(env) => {
                for (key, val) in env {
                    match val {
                        Some(val) => process.env(key, val),
                        None => process.env_remove(key),
                    };
                }
            }
            CommandEnv::NoInherit(env) => {
                process.env_clear().envs(env);
            }
        }

        if let Some(dir) = &self.current_dir {
            process.current_dir(dir);
        }

        process
    }
}

/// Environment variables attached to a [Command].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEnv {
    /// Environment variables the process will have, in addition to the ones
    /// inherited from the parent process.
    ///
    /// A `None` value indicates that the environment variable will be removed
    /// from the process, even if it was inherited.
    Inherit(BTreeMap<String, Option<String>>),

    /// Environment variables the process will have, without inheriting any
    /// from the parent process.
    NoInherit(BTreeMap<String, String>),
}

impl CommandEnv {
    /// Returns whether the environment of the parent process is inherited.
    pub const fn inherits(&self) -> bool {
        matches!(self, Self::Inherit(_))
    }

    /// Returns the explicitly set variables, in order.
    pub fn explicit_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        let (inherit, no_inherit) = match self {
            Self::Inherit(env) => (Some(env), None),
            Self::NoInherit(env) => (None, Some(env)),
        };

        inherit
            .into_iter()
            .flat_map(|env| {
                env.iter()
                    .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
            })
            .chain(
                no_inherit
                    .into_iter()
                    .flat_map(|env| env.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            )
    }

    /// Returns the variables removed from the inherited environment.
    pub fn removed_vars(&self) -> impl Iterator<Item = &str> {
        let env = match self {
            Self::Inherit(env) => Some(env),
            Self::NoInherit(_) => None,
        };

        env.into_iter().flat_map(|env| {
            env.iter()
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| k.as_str())
        })
    }
}
