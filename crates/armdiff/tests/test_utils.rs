//! Shared helpers for the integration tests: shell-script stand-ins for the
//! simulators and a capturing writer for the report sink.
#![allow(dead_code)]

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use armdiff::SimulatorPaths;
use tempfile::TempDir;

pub const MAX_TEST_THREADS: usize = 5;

pub fn cap_threads(args: &mut libtest_mimic::Arguments) {
    let requested = args.test_threads.unwrap_or(MAX_TEST_THREADS);
    args.test_threads = Some(requested.min(MAX_TEST_THREADS));
}

/// A simulator that answers `go`, `rdump` and `quit`. `rdump` reports
/// `X0 = x0` followed by `extra` (already indented shell lines).
fn well_behaved(x0: u64, extra: &str) -> String {
    format!(
        r#"#!/bin/sh
echo "ARM simulator stand-in"
echo "Loaded $1"
printf 'ARM-SIM> '
while IFS= read -r cmd; do
    case "$cmd" in
        go)
            echo "Simulating..."
            ;;
        rdump)
            echo "PC: 0x400008"
            echo "X0: {x0:#x}"
            echo "FLAG_Z: 0"
{extra}            ;;
        quit)
            echo "Bye."
            exit 0
            ;;
        *)
            echo "Unknown command: $cmd"
            ;;
    esac
    printf 'ARM-SIM> '
done
"#
    )
}

/// Like [`well_behaved`], but `go` takes 0.8 s before answering.
fn slow_go(x0: u64) -> String {
    well_behaved(x0, "").replacen(
        "echo \"Simulating...\"",
        "sleep 0.8\n            echo \"Simulating...\"",
        1,
    )
}

/// On `rdump`, prints a trace line every 100 ms for 3 s before the dump.
const CHATTY: &str = r#"#!/bin/sh
printf 'ARM-SIM> '
while IFS= read -r cmd; do
    case "$cmd" in
        rdump)
            i=0
            while [ "$i" -lt 30 ]; do
                echo "trace $i"
                sleep 0.1
                i=$((i + 1))
            done
            echo "PC: 0x400008"
            ;;
        quit)
            echo "Bye."
            exit 0
            ;;
    esac
    printf 'ARM-SIM> '
done
"#;

/// Dies before printing a prompt.
const CRASHING: &str = r#"#!/bin/sh
echo "fatal: cannot load $1" >&2
exit 3
"#;

/// Prints half a register dump on `rdump`, then blocks on its input.
const STALLING: &str = r#"#!/bin/sh
printf 'ARM-SIM> '
while IFS= read -r cmd; do
    case "$cmd" in
        rdump)
            echo "PC: 0x1"
            read -r _
            ;;
        quit)
            echo "Bye."
            exit 0
            ;;
    esac
    printf 'ARM-SIM> '
done
"#;

/// Ignores `quit` and SIGTERM.
const STUBBORN: &str = r#"#!/bin/sh
trap '' TERM
printf 'ARM-SIM> '
exec sleep 30
"#;

/// Stand-in simulators and an input program in one temporary directory.
///
/// Created once in `main` before any trial runs: writing an executable while
/// another thread forks can leave it busy for exec.
pub struct Fixtures {
    _dir: TempDir,
    root: PathBuf,
}

impl Fixtures {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_path_buf();
        fs::write(root.join("program.x"), "00000000\n")?;

        let scripts = [
            ("ref_sim", well_behaved(5, "")),
            ("sim_same", well_behaved(5, "")),
            ("sim_x0", well_behaved(6, "")),
            (
                "sim_flag",
                well_behaved(5, "            echo \"FLAG_N: 0\"\n"),
            ),
            ("sim_slow_go", slow_go(5)),
            ("chatty", CHATTY.to_string()),
            ("crash", CRASHING.to_string()),
            ("stall", STALLING.to_string()),
            ("stubborn", STUBBORN.to_string()),
        ];
        for (name, body) in scripts {
            let path = root.join(name);
            fs::write(&path, body)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(Self { _dir: dir, root })
    }

    pub fn sim(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn input(&self) -> PathBuf {
        self.root.join("program.x")
    }

    pub fn paths(&self, candidate: &str, reference: &str) -> SimulatorPaths {
        SimulatorPaths {
            candidate: self.sim(candidate),
            reference: self.sim(reference),
        }
    }
}

/// The process is gone and reaped.
pub fn process_gone(pid: u32) -> bool {
    !Path::new(&format!("/proc/{pid}")).exists()
}

/// Writer that records every write with its arrival time so tests can
/// inspect both content and order.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<(Instant, String)>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        self.0.lock().unwrap().iter().map(|(_, s)| s.as_str()).collect()
    }

    /// When the first write containing `needle` arrived.
    pub fn written_at(&self, needle: &str) -> Option<Instant> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(_, s)| s.contains(needle))
            .map(|(at, _)| *at)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf).into_owned();
        self.0.lock().unwrap().push((Instant::now(), text));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
