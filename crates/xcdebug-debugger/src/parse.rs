//! Structured field extraction from debugger output.

/// Stack frame of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame index (0 is the innermost frame).
    pub index: u32,

    /// Program counter of the frame.
    pub address: u64,

    /// Binary containing the frame's code, if known.
    pub module: Option<String>,

    /// Symbol (possibly with an offset, e.g., `start + 2360`).
    pub symbol: String,

    /// Source location (`file:line[:column]`), if known.
    pub location: Option<String>,

    /// Whether this is the selected frame.
    pub selected: bool,
}

/// Thread of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Thread index (as used by `thread select`).
    pub index: u32,

    /// System thread ID, if reported.
    pub tid: Option<u64>,

    /// Thread name, if any.
    pub name: Option<String>,

    /// Dispatch queue, if any.
    pub queue: Option<String>,

    /// Why the thread stopped, if it did.
    pub stop_reason: Option<String>,

    /// Whether this is the selected thread.
    pub selected: bool,
}

/// Frames of a single thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBacktrace {
    /// The thread.
    pub thread: ThreadInfo,

    /// Its frames, innermost first.
    pub frames: Vec<Frame>,
}

/// Variable of a stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Type name.
    pub ty: String,

    /// Variable name.
    pub name: String,

    /// Value summary, possibly spanning several lines for aggregates.
    pub value: String,
}

/// Parses the output of `thread backtrace`.
pub fn parse_backtrace(output: &str) -> Vec<ThreadBacktrace> {
    let mut backtraces: Vec<ThreadBacktrace> = Vec::new();

    for line in output.lines() {
        if let Some(thread) = parse_thread_line(line) {
            backtraces.push(ThreadBacktrace {
                thread,
                frames: Vec::new(),
            });
        } else if let Some(frame) = parse_frame_line(line) {
            if let Some(last) = backtraces.last_mut() {
                last.frames.push(frame);
            }
        }
    }

    backtraces
}

/// Parses the output of `thread list`.
pub fn parse_thread_list(output: &str) -> Vec<ThreadInfo> {
    output.lines().filter_map(parse_thread_line).collect()
}

/// Parses a thread line:
///
/// ```text
/// * thread #1, queue = 'com.apple.main-thread', stop reason = breakpoint 1.1
///   thread #2: tid = 0x1a2c, 0x000000018ec0a8b0 libsystem_kernel.dylib`__workq_kernreturn + 8
/// ```
pub fn parse_thread_line(line: &str) -> Option<ThreadInfo> {
    let line = line.trim();
    let (selected, line) = match line.strip_prefix("* ") {
        Some(line) => (true, line),
        None => (false, line),
    };

    let rest = line.strip_prefix("thread #")?;
    let (index, rest) = split_index(rest)?;

    let tid = rest.split_once("tid = 0x").and_then(|(_, tid)| {
        let end = tid
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(tid.len());
        u64::from_str_radix(&tid[..end], 16).ok()
    });

    Some(ThreadInfo {
        index,
        tid,
        name: quoted_field(rest, "name = '"),
        queue: quoted_field(rest, "queue = '"),
        stop_reason: rest
            .split_once("stop reason = ")
            .map(|(_, reason)| reason.trim().to_owned()),
        selected,
    })
}

/// Parses a frame line:
///
/// ```text
///   * frame #0: 0x0000000100003f54 App`main at main.swift:3:5
///     frame #1: 0x000000018e8d50e0 dyld`start + 2360
/// ```
pub fn parse_frame_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    let (selected, line) = match line.strip_prefix("* ") {
        Some(line) => (true, line),
        None => (false, line),
    };

    let rest = line.strip_prefix("frame #")?;
    let (index, rest) = split_index(rest)?;

    let rest = rest.trim_start_matches(':').trim_start();
    let (address, rest) = rest.split_once(' ').unwrap_or((rest, ""));
    let address = u64::from_str_radix(address.strip_prefix("0x")?, 16).ok()?;

    let (module, symbol) = match rest.trim().split_once('`') {
        Some((module, symbol)) => (Some(module.to_owned()), symbol),
        None => (None, rest.trim()),
    };

    let (symbol, location) = match symbol.split_once(" at ") {
        Some((symbol, location)) => (symbol, Some(location.trim().to_owned())),
        None => (symbol, None),
    };

    Some(Frame {
        index,
        address,
        module,
        symbol: symbol.trim().to_owned(),
        location,
        selected,
    })
}

/// Parses the output of `frame variable`.
pub fn parse_variables(output: &str) -> Vec<Variable> {
    let mut variables: Vec<Variable> = Vec::new();

    for line in output.lines() {
        if line.starts_with('(') {
            if let Some(variable) = parse_variable_line(line) {
                variables.push(variable);
                continue;
            }
        }

        // continuation of an aggregate value
        if let Some(last) = variables.last_mut() {
            last.value.push('\n');
            last.value.push_str(line);
        }
    }

    variables
}

fn parse_variable_line(line: &str) -> Option<Variable> {
    let mut depth = 0usize;
    let mut type_end = None;

    for (i, c) in line.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    type_end = Some(i);
                    break;
                }
            }
            _ => (),
        }
    }

    let type_end = type_end?;
    let ty = line[1..type_end].trim().to_owned();
    let rest = line[type_end + 1..].trim();

    let (name, value) = rest.split_once(" = ").unwrap_or((rest, ""));

    Some(Variable {
        ty,
        name: name.trim().to_owned(),
        value: value.trim().to_owned(),
    })
}

/// Parses the ID from `Breakpoint 3: where = App`main + 20 at main.swift:3:5, ...`.
pub fn parse_breakpoint_id(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Breakpoint ")?;
        let (id, rest) = split_index(rest)?;
        rest.starts_with(':').then_some(id)
    })
}

/// Parses the ID from `Watchpoint created: Watchpoint 1: addr = 0x... size = 4 ...`.
pub fn parse_watchpoint_id(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("Watchpoint created: Watchpoint ")?;
        split_index(rest).map(|(id, _)| id)
    })
}

fn split_index(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let index = s[..end].parse().ok()?;
    Some((index, &s[end..]))
}

fn quoted_field(s: &str, prefix: &str) -> Option<String> {
    let (_, rest) = s.split_once(prefix)?;
    let (value, _) = rest.split_once('\'')?;
    Some(value.to_owned())
}
