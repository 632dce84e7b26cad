//! Module-name normalization.
//!
//! Import names and install names differ for a fair number of popular
//! projects (`cv2` is installed as `opencv-python`). [`NameAliases`] is the
//! read-only lookup that maps one to the other and filters out names that
//! can never be third-party installs. Build it once and share it by `Arc`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::domain::Result;

/// Import name → install name.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("attr", "attrs"),
    ("bs4", "beautifulsoup4"),
    ("crypto", "pycryptodome"),
    ("cv2", "opencv-python"),
    ("dateutil", "python-dateutil"),
    ("docx", "python-docx"),
    ("dotenv", "python-dotenv"),
    ("fitz", "pymupdf"),
    ("git", "gitpython"),
    ("jwt", "pyjwt"),
    ("magic", "python-magic"),
    ("mysqldb", "mysqlclient"),
    ("openssl", "pyopenssl"),
    ("pil", "pillow"),
    ("pptx", "python-pptx"),
    ("serial", "pyserial"),
    ("skimage", "scikit-image"),
    ("sklearn", "scikit-learn"),
    ("telegram", "python-telegram-bot"),
    ("usb", "pyusb"),
    ("win32api", "pywin32"),
    ("yaml", "pyyaml"),
    ("zmq", "pyzmq"),
];

/// Top-level standard-library modules of CPython 2.7 and 3.x.
const STDLIB_MODULES: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asynchat", "asyncio", "asyncore",
    "atexit", "audioop", "base64", "bdb", "binascii", "bisect", "builtins", "bz2",
    "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd", "code", "codecs", "codeop",
    "collections", "colorsys", "commands", "compileall", "concurrent", "configparser",
    "contextlib", "contextvars", "copy", "copyreg", "cookielib", "cpickle", "cprofile",
    "crypt", "csv", "cstringio", "ctypes", "curses", "dataclasses", "datetime", "dbm",
    "decimal", "difflib", "dis", "doctest", "email", "encodings", "ensurepip", "enum",
    "errno", "exceptions", "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch",
    "fractions", "ftplib", "functools", "gc", "getopt", "getpass", "gettext", "glob",
    "graphlib", "grp", "gzip", "hashlib", "heapq", "hmac", "html", "htmlparser",
    "httplib", "http", "imaplib", "imghdr", "imp", "importlib", "inspect", "io",
    "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache", "locale",
    "logging", "lzma", "mailbox", "marshal", "math", "md5", "mimetypes", "mmap",
    "modulefinder", "msvcrt", "multiprocessing", "netrc", "nntplib", "numbers",
    "operator", "optparse", "os", "pathlib", "pdb", "pickle", "pickletools", "pipes",
    "pkgutil", "platform", "plistlib", "poplib", "posix", "pprint", "profile", "pstats",
    "pty", "pwd", "py_compile", "pyclbr", "pydoc", "queue", "quopri", "random", "re",
    "readline", "reprlib", "resource", "rlcompleter", "runpy", "sched", "secrets",
    "select", "selectors", "sets", "sha", "shelve", "shlex", "shutil", "signal", "site",
    "smtpd", "smtplib", "socket", "socketserver", "sqlite3", "ssl", "stat", "statistics",
    "string", "stringio", "struct", "subprocess", "sys", "sysconfig", "syslog",
    "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "textwrap", "thread",
    "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib", "trace",
    "traceback", "tracemalloc", "tty", "turtle", "types", "typing", "unicodedata",
    "unittest", "urllib", "urllib2", "urlparse", "uu", "uuid", "venv", "warnings",
    "wave", "weakref", "webbrowser", "winreg", "wsgiref", "xml", "xmlrpc", "xmlrpclib",
    "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

#[derive(Deserialize)]
struct AliasEntry {
    #[serde(rename = "ref")]
    install_name: String,
}

/// Read-only import-name lookup.
#[derive(Debug, Clone)]
pub struct NameAliases {
    aliases: HashMap<String, String>,
    stdlib: HashSet<String>,
}

impl Default for NameAliases {
    fn default() -> Self {
        Self::builtin()
    }
}

impl NameAliases {
    /// Lookup with the built-in alias and standard-library tables.
    pub fn builtin() -> Self {
        Self {
            aliases: BUILTIN_ALIASES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            stdlib: STDLIB_MODULES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Extend the built-in table from a JSON document of the form
    /// `{"import_name": {"ref": "install-name"}, ...}`.
    pub fn with_json(mut self, json: &str) -> Result<Self> {
        let entries: HashMap<String, AliasEntry> = serde_json::from_str(json)?;
        for (import_name, entry) in entries {
            self.aliases
                .insert(import_name.to_lowercase(), entry.install_name.to_lowercase());
        }
        Ok(self)
    }

    /// [`with_json`](Self::with_json) reading the document from `path`.
    pub fn with_file(self, path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        self.with_json(&json)
    }

    pub fn is_stdlib(&self, name: &str) -> bool {
        self.stdlib.contains(&name.to_lowercase())
    }

    /// Install name for a module named by the oracle.
    ///
    /// Lowercases, collapses dotted paths, strips stray punctuation and maps
    /// through the alias table. Standard-library names yield `None`.
    pub fn install_name(&self, raw: &str) -> Option<String> {
        let head = strip_name(raw);
        if head.is_empty() {
            return None;
        }
        let key = head.to_lowercase();
        if self.stdlib.contains(&key) {
            debug!(module = %key, "dropping standard-library module");
            return None;
        }
        Some(self.aliases.get(&key).cloned().unwrap_or(key))
    }

    /// Install name for an import found in source text.
    ///
    /// Stricter than [`install_name`](Self::install_name): TitleCase names
    /// (classes, not packages) and names starting with a digit are dropped.
    pub fn scanned_name(&self, raw: &str) -> Option<String> {
        let head = strip_name(raw);
        if head.starts_with(|c: char| c.is_ascii_digit()) || is_title_case(&head) {
            return None;
        }
        self.install_name(&head)
    }

    /// Normalize a list of oracle-supplied names, keeping first occurrences.
    pub fn install_names<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        dedup(names.into_iter().filter_map(|n| self.install_name(n.as_ref())))
    }

    /// Normalize a list of scanned import names, keeping first occurrences.
    pub fn scanned_names<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        dedup(names.into_iter().filter_map(|n| self.scanned_name(n.as_ref())))
    }
}

fn strip_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ';' | ',' | '\'' | '"'))
        .collect();
    cleaned.split('.').next().unwrap_or_default().trim().to_string()
}

/// `Foo` and `FooBar` are title case; `foo`, `PIL` and `Foo_bar` are not.
fn is_title_case(name: &str) -> bool {
    let starts_upper = name.chars().next().is_some_and(char::is_uppercase);
    starts_upper
        && name.chars().any(char::is_lowercase)
        && !name.contains('_')
        && name
            .chars()
            .zip(name.chars().skip(1))
            .all(|(a, b)| !(a.is_uppercase() && b.is_uppercase()))
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}
