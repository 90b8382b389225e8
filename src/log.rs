use backtrace::Backtrace;
use nix::errno::{errno, Errno};
use std::{
    collections::HashMap,
    env,
    env::var_os,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    sync::Mutex,
};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    default_level: LogLevel,
    /// Possibly buffered
    log_file: Box<dyn Write + Send>,
}

extern "C" fn flush_log_buffer() {
    if let Ok(mut lock) = LOG_GLOBALS.lock() {
        lock.log_file.flush().unwrap_or(());
    }
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let maybe_filename = var_os("RD_LOG_FILE");
        let maybe_append_filename = var_os("RD_APPEND_LOG_FILE");
        let mut f: Box<dyn Write + Send>;
        if let Some(filename) = maybe_filename {
            f = Box::new(File::create(&filename).unwrap_or_else(|_| {
                panic!(
                    "Error. Could not create filename `{:?}' specified in environment variable RD_LOG_FILE",
                    filename
                )
            }));
        } else if let Some(append_filename) = maybe_append_filename {
            f = Box::new(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&append_filename)
                    .unwrap_or_else(|_| {
                        panic!(
                            "Error. Could not append to filename `{:?}' specified in env variable RD_APPEND_LOG_FILE",
                            append_filename
                        )
                    }),
            );
        } else {
            f = Box::new(io::stderr());
        }

        if let Ok(buf_size) = env::var("RD_LOG_BUFFER") {
            let log_buffer_size = buf_size.parse::<usize>().unwrap_or_else(|_| {
                panic!(
                    "Error. Could not parse `{:?}' in environment var `RD_LOG_BUFFER' as a number",
                    buf_size
                )
            });
            f = Box::new(BufWriter::with_capacity(log_buffer_size, f));
        }

        let ret = unsafe { libc::atexit(flush_log_buffer) };
        assert_eq!(ret, 0);

        let (default_level, level_map) = match env::var("RD_LOG") {
            Ok(rd_log) => init_log_levels(&rd_log),
            Err(_) => (LogError, HashMap::new()),
        };

        Mutex::new(LogGlobals {
            level_map,
            default_level,
            log_file: f,
        })
    };
}

fn log_level_string_to_level(log_level_string: &str) -> LogLevel {
    match log_level_string {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "info" => LogInfo,
        "debug" => LogDebug,
        _ => LogWarn,
    }
}

/// Parse the RD_LOG spec: a comma-separated list of `module:level`
/// entries. The module name `all` sets the default level.
fn init_log_levels(spec: &str) -> (LogLevel, HashMap<String, LogLevel>) {
    let mut default_level = LogError;
    let mut level_map: HashMap<String, LogLevel> = HashMap::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(2, ':');
        let name = parts.next().unwrap_or("");
        let level = log_level_string_to_level(parts.next().unwrap_or(""));
        if name == "all" {
            default_level = level;
        } else {
            level_map.insert(name.to_owned(), level);
        }
    }
    (default_level, level_map)
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

/// The module name used for level lookup is the last path segment,
/// e.g. `monkey_patcher` for `rd_monkeypatch::monkey_patcher`.
fn module_name(module_path: &str) -> &str {
    module_path.rsplit("::").next().unwrap_or(module_path)
}

pub fn is_logging(level: LogLevel, module_path: &str) -> bool {
    let lock = match LOG_GLOBALS.lock() {
        Ok(lock) => lock,
        Err(_) => return false,
    };
    let enabled = match lock.level_map.get(module_name(module_path)) {
        Some(&l) => l,
        None => lock.default_level,
    };
    level <= enabled
}

/// Collects one log line and flushes it, newline terminated, to the
/// log stream when dropped.
pub struct NewLineTerminatingOstream {
    message: Vec<u8>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        module_path: &str,
        always_enabled: bool,
    ) -> Option<NewLineTerminatingOstream> {
        if !always_enabled && !is_logging(level, module_path) {
            return None;
        }
        let mut this = NewLineTerminatingOstream {
            message: Vec::new(),
        };
        write_prefix(&mut this.message, level, filename, line, module_path);
        Some(this)
    }
}

impl Write for NewLineTerminatingOstream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.message.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        self.message.push(b'\n');
        if let Ok(mut lock) = LOG_GLOBALS.lock() {
            lock.log_file.write_all(&self.message).unwrap_or(());
        }
    }
}

pub fn write_prefix(
    stream: &mut dyn Write,
    level: LogLevel,
    filename: &str,
    line: u32,
    _module_path: &str,
) {
    write!(stream, "[{} {}:{}", log_name(level), filename, line).unwrap();

    let err = errno();
    if level <= LogWarn && err != 0 {
        write!(stream, " errno: {:?}", Errno::from_i32(err)).unwrap();
    }
    write!(stream, "] ").unwrap();
}

/// This is almost always not the method you want. Use the log!() macro
/// instead.
pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    module_path: &str,
    always_enabled: bool,
) -> Option<NewLineTerminatingOstream> {
    NewLineTerminatingOstream::new(log_level, filename, line, module_path, always_enabled)
}

/// Dump the stacktrace and abort.
pub fn notifying_abort(bt: Backtrace) -> ! {
    flush_log_buffer();
    eprintln!("=== Start rd-monkeypatch backtrace:");
    eprintln!("{:?}", bt);
    eprintln!("=== End rd-monkeypatch backtrace");
    std::process::abort();
}

/// Outputs to (possibly write buffered) log file (or stderr if no log
/// file was specified). After this the program continues normally.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use std::io::Write;
            let maybe_stream = crate::log::log(
                $log_level,
                file!(),
                line!(),
                module_path!(),
                false
            );
            match maybe_stream {
                Some(mut stream) => write!(stream, $($args)+).unwrap(),
                None => ()
            }
        }
    };
}

macro_rules! is_logging {
    ($log_level:expr) => {
        crate::log::is_logging($log_level, module_path!())
    };
}

/// Outputs to the log stream, prints a backtrace to stderr and aborts.
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use std::io::Write;
                use crate::log::LogFatal;
                let maybe_stream = crate::log::log(
                    LogFatal,
                    file!(),
                    line!(),
                    module_path!(),
                    true
                );
                match maybe_stream {
                   Some(mut stream) => write!(stream, $($args)+).unwrap(),
                   None => ()
                }
            }
            crate::log::notifying_abort(backtrace::Backtrace::new());
        }
    };
}

/// Assert a condition that must hold for a particular task; the
/// task's tid appears in the failure message.
macro_rules! ed_assert {
    ($task:expr, $cond:expr) => {
        if !$cond {
            fatal!(
                "(task {}) Assertion `{}' failed to hold.",
                $task.tid(),
                stringify!($cond)
            );
        }
    };
    ($task:expr, $cond:expr, $($args:tt)+) => {
        if !$cond {
            fatal!(
                "(task {}) Assertion `{}' failed to hold: {}",
                $task.tid(),
                stringify!($cond),
                format!($($args)+)
            );
        }
    };
}
