//! Local block-device tooling: format, mount, unmount and filesystem probes.
//!
//! [`SystemTools`] shells out to the host binaries through a
//! [`CommandRunner`], so tests can script every invocation without touching
//! real devices.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::DriverConfig;
use crate::hostfs;

mod runner;

pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, SpawnError};

/// `blkid` exit status meaning the device carries no recognised signature.
const BLKID_NO_MATCH: i32 = 2;

/// Raised when a local command fails or cannot be started.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{operation} via {program} failed (status {}): {output}", status_label(.status.as_ref()))]
pub struct LocalToolError {
    /// Executable that was invoked.
    pub program: String,
    /// Operation being performed (`format`, `mount`, ...).
    pub operation: String,
    /// Exit status; `None` when the process never ran or was killed.
    pub status: Option<i32>,
    /// Combined diagnostic output.
    pub output: String,
}

fn status_label(status: Option<&i32>) -> String {
    status.map_or_else(|| String::from("none"), ToString::to_string)
}

impl LocalToolError {
    fn from_spawn(operation: &str, err: SpawnError) -> Self {
        Self {
            program: err.program,
            operation: operation.to_owned(),
            status: None,
            output: err.message,
        }
    }

    fn from_output(program: &str, operation: &str, output: &CommandOutput) -> Self {
        Self {
            program: program.to_owned(),
            operation: operation.to_owned(),
            status: output.code,
            output: output.combined(),
        }
    }
}

/// Host operations the mount orchestrator relies on.
pub trait LocalTools: Send + Sync {
    /// Creates a filesystem of `fs_type` on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`LocalToolError`] when formatting fails.
    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<(), LocalToolError>;

    /// Mounts `device` at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LocalToolError`] when mounting fails.
    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), LocalToolError>;

    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LocalToolError`] when unmounting fails.
    fn unmount(&self, target: &Utf8Path) -> Result<(), LocalToolError>;

    /// Reports the filesystem type on `device`, or `None` when unformatted.
    ///
    /// # Errors
    ///
    /// Returns [`LocalToolError`] when the probe itself fails. A failed probe
    /// must never be mistaken for a blank device.
    fn detect_filesystem(&self, device: &Utf8Path) -> Result<Option<String>, LocalToolError>;

    /// Returns `true` when `target` is currently a mount point.
    ///
    /// # Errors
    ///
    /// Returns [`LocalToolError`] when the mount table cannot be read.
    fn is_mounted(&self, target: &Utf8Path) -> Result<bool, LocalToolError>;
}

/// Binary locations used by [`SystemTools`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolPaths {
    /// `mkfs` executable.
    pub mkfs: String,
    /// `mount` executable.
    pub mount: String,
    /// `umount` executable.
    pub umount: String,
    /// `blkid` executable.
    pub blkid: String,
    /// Mount table to consult.
    pub mounts_table: Utf8PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            mkfs: String::from("mkfs"),
            mount: String::from("mount"),
            umount: String::from("umount"),
            blkid: String::from("blkid"),
            mounts_table: Utf8PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl From<&DriverConfig> for ToolPaths {
    fn from(config: &DriverConfig) -> Self {
        Self {
            mkfs: config.mkfs_bin.trim().to_owned(),
            mount: config.mount_bin.trim().to_owned(),
            umount: config.umount_bin.trim().to_owned(),
            blkid: config.blkid_bin.trim().to_owned(),
            mounts_table: Utf8PathBuf::from(config.mounts_table.trim()),
        }
    }
}

/// Process-backed [`LocalTools`] implementation.
#[derive(Clone, Debug)]
pub struct SystemTools<R: CommandRunner> {
    paths: ToolPaths,
    runner: R,
}

impl<R: CommandRunner> SystemTools<R> {
    /// Creates tools that invoke the binaries named in `paths`.
    pub const fn new(paths: ToolPaths, runner: R) -> Self {
        Self { paths, runner }
    }

    fn run(
        &self,
        program: &str,
        operation: &str,
        args: Vec<OsString>,
    ) -> Result<CommandOutput, LocalToolError> {
        debug!(program, operation, ?args, "running local tool");
        self.runner
            .run(program, &args)
            .map_err(|err| LocalToolError::from_spawn(operation, err))
    }

    fn run_checked(
        &self,
        program: &str,
        operation: &str,
        args: Vec<OsString>,
    ) -> Result<(), LocalToolError> {
        let output = self.run(program, operation, args)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(LocalToolError::from_output(program, operation, &output))
        }
    }
}

impl<R: CommandRunner> LocalTools for SystemTools<R> {
    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<(), LocalToolError> {
        self.run_checked(
            &self.paths.mkfs,
            "format",
            vec![
                OsString::from("-t"),
                OsString::from(fs_type),
                OsString::from(device.as_str()),
            ],
        )
    }

    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), LocalToolError> {
        self.run_checked(
            &self.paths.mount,
            "mount",
            vec![OsString::from(device.as_str()), OsString::from(target.as_str())],
        )
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), LocalToolError> {
        self.run_checked(
            &self.paths.umount,
            "unmount",
            vec![OsString::from(target.as_str())],
        )
    }

    fn detect_filesystem(&self, device: &Utf8Path) -> Result<Option<String>, LocalToolError> {
        let program = self.paths.blkid.as_str();
        let output = self.run(
            program,
            "detect_filesystem",
            vec![
                OsString::from("-o"),
                OsString::from("value"),
                OsString::from("-s"),
                OsString::from("TYPE"),
                OsString::from(device.as_str()),
            ],
        )?;
        match output.code {
            Some(0) => {
                let fs_type = output.stdout.trim();
                Ok((!fs_type.is_empty()).then(|| fs_type.to_owned()))
            }
            Some(BLKID_NO_MATCH) => Ok(None),
            _ => Err(LocalToolError::from_output(
                program,
                "detect_filesystem",
                &output,
            )),
        }
    }

    fn is_mounted(&self, target: &Utf8Path) -> Result<bool, LocalToolError> {
        let table_path = self.paths.mounts_table.as_path();
        let table = hostfs::read_to_string(table_path).map_err(|err| LocalToolError {
            program: table_path.to_string(),
            operation: String::from("is_mounted"),
            status: None,
            output: err.to_string(),
        })?;
        Ok(hostfs::mount_targets(&table)
            .iter()
            .any(|mounted| mounted == target))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingRunner {
        calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
        responses: Arc<Mutex<Vec<Result<CommandOutput, SpawnError>>>>,
    }

    impl RecordingRunner {
        fn respond(self, response: Result<CommandOutput, SpawnError>) -> Self {
            self.responses
                .lock()
                .unwrap_or_else(|err| panic!("responses lock poisoned: {err}"))
                .push(response);
            self
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls
                .lock()
                .unwrap_or_else(|err| panic!("calls lock poisoned: {err}"))
                .clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
            self.calls
                .lock()
                .unwrap_or_else(|err| panic!("calls lock poisoned: {err}"))
                .push((
                    program.to_owned(),
                    args.iter()
                        .map(|arg| arg.to_string_lossy().into_owned())
                        .collect(),
                ));
            let mut responses = self
                .responses
                .lock()
                .unwrap_or_else(|err| panic!("responses lock poisoned: {err}"));
            if responses.is_empty() {
                panic!("unexpected invocation of {program}");
            }
            responses.remove(0)
        }
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        }
    }

    fn tools(runner: RecordingRunner) -> SystemTools<RecordingRunner> {
        SystemTools::new(ToolPaths::default(), runner)
    }

    #[test]
    fn format_invokes_mkfs_with_type_and_device() {
        let runner = RecordingRunner::default().respond(Ok(output(0, "", "")));
        let subject = tools(runner.clone());

        subject
            .format(Utf8Path::new("/dev/sdc"), "xfs")
            .expect("format succeeds");

        assert_eq!(
            runner.calls(),
            vec![(
                String::from("mkfs"),
                vec![
                    String::from("-t"),
                    String::from("xfs"),
                    String::from("/dev/sdc")
                ]
            )]
        );
    }

    #[test]
    fn mount_failure_carries_status_and_output() {
        let runner = RecordingRunner::default().respond(Ok(output(32, "", "wrong fs type")));
        let subject = tools(runner);

        let err = subject
            .mount(Utf8Path::new("/dev/sdc"), Utf8Path::new("/mnt/db-data"))
            .expect_err("mount fails");

        assert_eq!(err.program, "mount");
        assert_eq!(err.operation, "mount");
        assert_eq!(err.status, Some(32));
        assert_eq!(err.output, "wrong fs type");
    }

    #[test]
    fn spawn_failure_has_no_status() {
        let runner = RecordingRunner::default().respond(Err(SpawnError {
            program: String::from("umount"),
            message: String::from("No such file or directory"),
        }));
        let subject = tools(runner);

        let err = subject
            .unmount(Utf8Path::new("/mnt/db-data"))
            .expect_err("spawn fails");

        assert_eq!(err.status, None);
        assert!(err.to_string().contains("status none"));
    }

    #[rstest]
    #[case(output(0, "xfs\n", ""), Some("xfs"))]
    #[case(output(2, "", ""), None)]
    #[case(output(0, "  \n", ""), None)]
    fn detect_filesystem_interprets_blkid(
        #[case] response: CommandOutput,
        #[case] expected: Option<&str>,
    ) {
        let runner = RecordingRunner::default().respond(Ok(response));
        let subject = tools(runner.clone());

        let detected = subject
            .detect_filesystem(Utf8Path::new("/dev/sdc"))
            .expect("probe succeeds");

        assert_eq!(detected.as_deref(), expected);
        let calls = runner.calls();
        assert_eq!(calls.first().map(|call| call.0.as_str()), Some("blkid"));
    }

    #[test]
    fn detect_filesystem_errors_on_probe_failure() {
        let runner =
            RecordingRunner::default().respond(Ok(output(4, "", "usage error")));
        let subject = tools(runner);

        let err = subject
            .detect_filesystem(Utf8Path::new("/dev/sdc"))
            .expect_err("probe failure is an error, not a blank device");

        assert_eq!(err.status, Some(4));
    }

    #[test]
    fn is_mounted_reads_configured_table() {
        let temp = TempDir::new().expect("temp dir");
        let table = Utf8PathBuf::from_path_buf(temp.path().join("mounts"))
            .unwrap_or_else(|path| panic!("temp path is not UTF-8: {}", path.display()));
        std::fs::write(&table, "/dev/sdc /mnt/db-data xfs rw 0 0\n").expect("write table");
        let paths = ToolPaths {
            mounts_table: table,
            ..ToolPaths::default()
        };
        let subject = SystemTools::new(paths, RecordingRunner::default());

        assert!(subject
            .is_mounted(Utf8Path::new("/mnt/db-data"))
            .expect("read table"));
        assert!(!subject
            .is_mounted(Utf8Path::new("/mnt/cache"))
            .expect("read table"));
    }
}
