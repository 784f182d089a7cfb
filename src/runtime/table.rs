//! # Runtime registry: what each runtime kind needs to be checked and run.
//!
//! The table is static. A [`RuntimeTable`] wraps it with per-kind program
//! overrides coming from [`Config::programs`](crate::Config::programs), so a
//! host can point `python-client` at a virtualenv interpreter without
//! touching the table.
//!
//! ```text
//! kind            family       ext   program   readiness   entry point
//! python-client   Embedded     py    python3   marker      soft
//! python          Interpreted  py    python3   settle      soft
//! node            Interpreted  js    node      settle      soft
//! shell           Interpreted  sh    sh        settle      -
//! go              Compiled     go    go        settle      required
//! rust            Compiled     rs    rustc     settle      required
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of supported execution environments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuntimeKind {
    /// Python program written against a client handle supplied by the host prelude.
    #[serde(rename = "python-client")]
    PythonClient,
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "node")]
    Node,
    #[serde(rename = "shell")]
    Shell,
    #[serde(rename = "go")]
    Go,
    #[serde(rename = "rust")]
    Rust,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 6] = [
        RuntimeKind::PythonClient,
        RuntimeKind::Python,
        RuntimeKind::Node,
        RuntimeKind::Shell,
        RuntimeKind::Go,
        RuntimeKind::Rust,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::PythonClient => "python-client",
            RuntimeKind::Python => "python",
            RuntimeKind::Node => "node",
            RuntimeKind::Shell => "shell",
            RuntimeKind::Go => "go",
            RuntimeKind::Rust => "rust",
        }
    }

    /// Static description of this runtime.
    pub fn spec(&self) -> &'static RuntimeSpec {
        match self {
            RuntimeKind::PythonClient => &PYTHON_CLIENT,
            RuntimeKind::Python => &PYTHON,
            RuntimeKind::Node => &NODE,
            RuntimeKind::Shell => &SHELL,
            RuntimeKind::Go => &GO,
            RuntimeKind::Rust => &RUST,
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown runtime kind `{0}`")]
pub struct UnknownRuntime(pub String);

impl FromStr for RuntimeKind {
    type Err = UnknownRuntime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        RuntimeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| UnknownRuntime(s.to_string()))
    }
}

/// How the user program relates to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// Wrapped in a host prelude that owns the messaging client.
    Embedded,
    /// Run directly by an interpreter.
    Interpreted,
    /// Built first, then the binary is run.
    Compiled,
}

/// How the launcher decides the worker is up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Alive after [`Config::spawn_settle`](crate::Config::spawn_settle).
    Settle,
    /// Printed this exact line on stdout within [`Config::ready_timeout`](crate::Config::ready_timeout).
    Marker(&'static str),
}

/// Denylisted construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    /// Plain substring.
    Substring(&'static str),
    /// Identifier with identifier boundaries on both sides.
    Word(&'static str),
    /// Identifier followed by optional whitespace and `(`.
    Call(&'static str),
}

impl Pattern {
    pub fn text(&self) -> &'static str {
        match self {
            Pattern::Substring(s) | Pattern::Word(s) | Pattern::Call(s) => s,
        }
    }
}

/// Structural requirement: any one of `needles` must appear.
#[derive(Clone, Copy, Debug)]
pub struct Marker {
    pub needles: &'static [&'static str],
    pub describes: &'static str,
    /// Missing required markers reject the program; others only warn.
    pub required: bool,
}

/// Toolchain front end fed the source on stdin.
#[derive(Clone, Copy, Debug)]
pub struct SyntaxCheck {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// Build step; `{src}` and `{bin}` in `args` are substituted.
#[derive(Clone, Copy, Debug)]
pub struct CompileStep {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// Static description of one runtime kind.
#[derive(Debug)]
pub struct RuntimeSpec {
    pub family: Family,
    pub extension: &'static str,
    /// Interpreter for interpreted/embedded kinds.
    pub program: &'static str,
    /// Arguments placed before the source path.
    pub run_args: &'static [&'static str],
    pub compile: Option<CompileStep>,
    pub syntax_check: Option<SyntaxCheck>,
    pub markers: &'static [Marker],
    pub denylist: &'static [Pattern],
    pub readiness: Readiness,
}

/// Line the embedded prelude prints once its client is connected.
pub const READY_MARKER: &str = "::workervisor-ready::";

const PYTHON_DENYLIST: &[Pattern] = &[
    Pattern::Substring("os.system"),
    Pattern::Substring("os.remove"),
    Pattern::Substring("os.unlink"),
    Pattern::Substring("shutil.rmtree"),
    Pattern::Word("subprocess"),
    Pattern::Word("__import__"),
    Pattern::Call("eval"),
    Pattern::Call("exec"),
    Pattern::Call("compile"),
    Pattern::Call("open"),
    Pattern::Call("file"),
];

const PYTHON_MARKERS: &[Marker] = &[
    Marker {
        needles: &["def "],
        describes: "at least one function definition",
        required: false,
    },
];

const PYTHON_CLIENT_MARKERS: &[Marker] = &[
    Marker {
        needles: &["def "],
        describes: "at least one function definition",
        required: false,
    },
    Marker {
        needles: &["on_message", "@bot.on_", "add_handler"],
        describes: "a message handler",
        required: false,
    },
];

const PYTHON_SYNTAX: SyntaxCheck = SyntaxCheck {
    program: "python3",
    args: &[
        "-c",
        "import ast, sys; ast.parse(sys.stdin.read(), '<worker>')",
    ],
};

static PYTHON_CLIENT: RuntimeSpec = RuntimeSpec {
    family: Family::Embedded,
    extension: "py",
    program: "python3",
    run_args: &["-u"],
    compile: None,
    syntax_check: Some(PYTHON_SYNTAX),
    markers: PYTHON_CLIENT_MARKERS,
    denylist: PYTHON_DENYLIST,
    readiness: Readiness::Marker(READY_MARKER),
};

static PYTHON: RuntimeSpec = RuntimeSpec {
    family: Family::Interpreted,
    extension: "py",
    program: "python3",
    run_args: &["-u"],
    compile: None,
    syntax_check: Some(PYTHON_SYNTAX),
    markers: PYTHON_MARKERS,
    denylist: PYTHON_DENYLIST,
    readiness: Readiness::Settle,
};

static NODE: RuntimeSpec = RuntimeSpec {
    family: Family::Interpreted,
    extension: "js",
    program: "node",
    run_args: &[],
    compile: None,
    syntax_check: Some(SyntaxCheck {
        program: "node",
        args: &[
            "-e",
            "new (require('vm').Script)(require('fs').readFileSync(0, 'utf8'), { filename: 'worker.js' })",
        ],
    }),
    markers: &[Marker {
        needles: &[".on(", "addEventListener", "onText", ".command("],
        describes: "an event handler registration",
        required: false,
    }],
    denylist: &[
        Pattern::Substring("child_process"),
        Pattern::Substring("fs.rm"),
        Pattern::Substring("fs.unlink"),
        Pattern::Substring("process.binding"),
        Pattern::Word("vm"),
        Pattern::Call("eval"),
        Pattern::Call("Function"),
    ],
    readiness: Readiness::Settle,
};

static SHELL: RuntimeSpec = RuntimeSpec {
    family: Family::Interpreted,
    extension: "sh",
    program: "sh",
    run_args: &[],
    compile: None,
    syntax_check: Some(SyntaxCheck {
        program: "sh",
        args: &["-n"],
    }),
    markers: &[],
    denylist: &[
        Pattern::Substring("rm -rf"),
        Pattern::Substring("rm -fr"),
        Pattern::Substring(":(){"),
        Pattern::Substring("/dev/sd"),
        Pattern::Substring("dd if="),
        Pattern::Word("mkfs"),
        Pattern::Word("eval"),
        Pattern::Word("exec"),
        Pattern::Word("shutdown"),
        Pattern::Word("reboot"),
    ],
    readiness: Readiness::Settle,
};

static GO: RuntimeSpec = RuntimeSpec {
    family: Family::Compiled,
    extension: "go",
    program: "go",
    run_args: &[],
    compile: Some(CompileStep {
        program: "go",
        args: &["build", "-o", "{bin}", "{src}"],
    }),
    syntax_check: Some(SyntaxCheck {
        program: "gofmt",
        args: &["-e"],
    }),
    markers: &[
        Marker {
            needles: &["package main"],
            describes: "`package main`",
            required: true,
        },
        Marker {
            needles: &["func main("],
            describes: "a `func main()` entry point",
            required: true,
        },
    ],
    denylist: &[
        Pattern::Substring("\"os/exec\""),
        Pattern::Substring("\"syscall\""),
        Pattern::Substring("\"unsafe\""),
        Pattern::Substring("os.RemoveAll"),
        Pattern::Call("os.Remove"),
    ],
    readiness: Readiness::Settle,
};

static RUST: RuntimeSpec = RuntimeSpec {
    family: Family::Compiled,
    extension: "rs",
    program: "rustc",
    run_args: &[],
    compile: Some(CompileStep {
        program: "rustc",
        args: &["--edition", "2021", "-O", "-o", "{bin}", "{src}"],
    }),
    syntax_check: None,
    markers: &[Marker {
        needles: &["fn main("],
        describes: "a `fn main()` entry point",
        required: true,
    }],
    denylist: &[
        Pattern::Substring("process::Command"),
        Pattern::Substring("remove_dir_all"),
        Pattern::Substring("remove_file"),
        Pattern::Substring("libc::"),
        Pattern::Word("unsafe"),
    ],
    readiness: Readiness::Settle,
};

/// Runtime table with per-kind program overrides.
#[derive(Clone, Debug, Default)]
pub struct RuntimeTable {
    programs: BTreeMap<RuntimeKind, PathBuf>,
}

impl RuntimeTable {
    pub fn new(programs: BTreeMap<RuntimeKind, PathBuf>) -> Self {
        Self { programs }
    }

    pub fn spec(&self, kind: RuntimeKind) -> &'static RuntimeSpec {
        kind.spec()
    }

    /// Program used to run workers of `kind` (override or table default).
    pub fn program(&self, kind: RuntimeKind) -> OsString {
        self.programs
            .get(&kind)
            .map(|p| p.clone().into_os_string())
            .unwrap_or_else(|| OsString::from(kind.spec().program))
    }

    /// Program used for the syntax check, if any.
    ///
    /// When the run program is overridden and the check uses the same tool,
    /// the override applies to the check too.
    pub fn check_program(&self, kind: RuntimeKind) -> Option<(OsString, &'static [&'static str])> {
        let spec = kind.spec();
        spec.syntax_check.map(|check| {
            let program = if check.program == spec.program {
                self.program(kind)
            } else {
                OsString::from(check.program)
            };
            (program, check.args)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_their_ids() {
        for kind in RuntimeKind::ALL {
            assert_eq!(kind.as_str().parse::<RuntimeKind>().unwrap(), kind);
        }
        assert_eq!("Python_Client".parse::<RuntimeKind>().unwrap(), RuntimeKind::PythonClient);
        assert!("cobol".parse::<RuntimeKind>().is_err());
    }

    #[test]
    fn only_embedded_kind_uses_the_marker_handshake() {
        for kind in RuntimeKind::ALL {
            let marker = matches!(kind.spec().readiness, Readiness::Marker(_));
            assert_eq!(marker, kind.spec().family == Family::Embedded, "{kind}");
        }
    }

    #[test]
    fn compiled_kinds_require_an_entry_point() {
        for kind in RuntimeKind::ALL {
            let spec = kind.spec();
            if spec.family == Family::Compiled {
                assert!(spec.compile.is_some());
                assert!(spec.markers.iter().any(|m| m.required), "{kind}");
            }
        }
    }

    #[test]
    fn program_override_also_drives_matching_check() {
        let mut programs = BTreeMap::new();
        programs.insert(RuntimeKind::Python, PathBuf::from("/opt/py/bin/python3"));
        let table = RuntimeTable::new(programs);
        assert_eq!(table.program(RuntimeKind::Python), "/opt/py/bin/python3");
        let (check, _) = table.check_program(RuntimeKind::Python).unwrap();
        assert_eq!(check, "/opt/py/bin/python3");
        assert_eq!(table.program(RuntimeKind::Node), "node");
        assert!(table.check_program(RuntimeKind::Rust).is_none());
    }
}
