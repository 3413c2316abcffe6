// Adb Toolchain - resolved installation and argument vectors

use crate::port::process_supervisor::InvocationSpec;
use std::path::{Path, PathBuf};

/// Resolved adb installation.
///
/// Constructed once at program start (from the SDK root environment
/// variable, or directly from a binary path in tests) and passed to every
/// component that spawns the tool. Immutable for the program's lifetime.
#[derive(Debug, Clone)]
pub struct AdbToolchain {
    adb: PathBuf,
}

impl AdbToolchain {
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self { adb: adb.into() }
    }

    /// Locate adb under an SDK installation root (`<root>/platform-tools/adb`)
    pub fn from_sdk_root(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join("platform-tools").join("adb"))
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    fn invocation(&self, args: Vec<String>) -> InvocationSpec {
        InvocationSpec::new(self.adb.clone(), args)
    }

    fn device_invocation(&self, serial: &str, args: &[&str]) -> InvocationSpec {
        let mut full = vec!["-s".to_string(), serial.to_string()];
        full.extend(args.iter().map(|s| s.to_string()));
        self.invocation(full)
    }

    /// `adb devices`
    pub fn list_devices(&self) -> InvocationSpec {
        self.invocation(vec!["devices".to_string()])
    }

    /// `adb -s <serial> shell getprop ro.product.model`
    pub fn query_model(&self, serial: &str) -> InvocationSpec {
        self.device_invocation(serial, &["shell", "getprop", "ro.product.model"])
    }

    /// `adb -s <serial> shell pm list packages <package>`
    pub fn list_packages(&self, serial: &str, package: &str) -> InvocationSpec {
        self.device_invocation(serial, &["shell", "pm", "list", "packages", package])
    }

    /// `adb -s <serial> install <apk>`
    pub fn install(&self, serial: &str, apk: &Path) -> InvocationSpec {
        let apk = apk.to_string_lossy();
        self.device_invocation(serial, &["install", apk.as_ref()])
    }

    /// `adb -s <serial> pull <remote> <local>`
    pub fn pull(&self, serial: &str, remote: &str, local: &Path) -> InvocationSpec {
        let local = local.to_string_lossy();
        self.device_invocation(serial, &["pull", remote, local.as_ref()])
    }

    /// `adb -s <serial> logcat`
    pub fn logcat(&self, serial: &str) -> InvocationSpec {
        self.device_invocation(serial, &["logcat"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(spec: &InvocationSpec) -> Vec<&str> {
        spec.args.iter().map(String::as_str).collect()
    }

    #[test]
    fn resolves_adb_under_platform_tools() {
        let toolchain = AdbToolchain::from_sdk_root("/opt/android-sdk");
        assert_eq!(
            toolchain.adb_path(),
            Path::new("/opt/android-sdk/platform-tools/adb")
        );
    }

    #[test]
    fn listing_vector() {
        let toolchain = AdbToolchain::new("/sdk/platform-tools/adb");
        let spec = toolchain.list_devices();
        assert_eq!(spec.program, PathBuf::from("/sdk/platform-tools/adb"));
        assert_eq!(args(&spec), ["devices"]);
    }

    #[test]
    fn per_device_vectors_carry_the_serial() {
        let toolchain = AdbToolchain::new("adb");

        assert_eq!(
            args(&toolchain.query_model("emulator-5554")),
            ["-s", "emulator-5554", "shell", "getprop", "ro.product.model"]
        );
        assert_eq!(
            args(&toolchain.list_packages("emulator-5554", "com.example.app")),
            ["-s", "emulator-5554", "shell", "pm", "list", "packages", "com.example.app"]
        );
        assert_eq!(
            args(&toolchain.install("emulator-5554", Path::new("/tmp/app.apk"))),
            ["-s", "emulator-5554", "install", "/tmp/app.apk"]
        );
        assert_eq!(
            args(&toolchain.pull("emulator-5554", "/sdcard/logs", Path::new("out"))),
            ["-s", "emulator-5554", "pull", "/sdcard/logs", "out"]
        );
        assert_eq!(
            args(&toolchain.logcat("emulator-5554")),
            ["-s", "emulator-5554", "logcat"]
        );
    }
}
