//! Synthetic `/sys` + `/proc` trees for tests

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::utils::sysfs::Host;

/// A kernel filesystem tree in a temporary directory
pub struct FakeHost {
    dir: TempDir,
    host: Host,
}

impl FakeHost {
    /// Create an empty tree
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let host = Host::rooted(dir.path());
        Self { dir, host }
    }

    /// Host rooted at the tree
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Root directory of the tree
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` at `rel`, creating parents
    pub fn file(&self, rel: impl AsRef<Path>, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write fixture file");
        path
    }

    /// Give `cpu` an index3 cache of `size_kb`
    pub fn cpu(&self, cpu: usize, size_kb: u64) -> &Self {
        self.file(
            self.host.l3_size(cpu).strip_prefix(self.root()).unwrap(),
            &format!("{}K\n", size_kb),
        );
        self
    }

    /// Add a CPU directory without any cache metadata
    pub fn cpu_without_cache(&self, cpu: usize) -> &Self {
        fs::create_dir_all(self.host.cpu_dir().join(format!("cpu{}", cpu)))
            .expect("create cpu dir");
        self
    }

    /// Typical 16-CPU dual-CCD part: 0-7 on the V-Cache die, 8-15 plain
    pub fn dual_ccd(&self) -> &Self {
        for cpu in 0..8 {
            self.cpu(cpu, 98304);
        }
        for cpu in 8..16 {
            self.cpu(cpu, 32768);
        }
        self
    }

    /// Write `/proc/interrupts`
    pub fn interrupts(&self, table: &str) -> &Self {
        self.file("proc/interrupts", table);
        self
    }

    /// Write `/proc/irq/<irq>/smp_affinity`
    pub fn affinity(&self, irq: u32, mask: &str) -> &Self {
        self.file(format!("proc/irq/{}/smp_affinity", irq), &format!("{}\n", mask));
        self
    }

    /// Current contents of `/proc/irq/<irq>/smp_affinity`
    pub fn read_affinity(&self, irq: u32) -> String {
        fs::read_to_string(self.host.irq_affinity(irq))
            .expect("read affinity")
            .trim()
            .to_string()
    }

    /// Make `/proc/irq/<irq>/smp_affinity` unwritable by putting a
    /// directory in its place
    pub fn unwritable_affinity(&self, irq: u32) -> &Self {
        fs::create_dir_all(self.host.irq_affinity(irq)).expect("create blocking dir");
        self
    }
}

/// Interrupt table with three GPU lines (130, 131, 140) and unrelated devices
pub const GPU_INTERRUPTS: &str = "\
            CPU0       CPU1       CPU2       CPU3
   0:         44          0          0          0  IR-IO-APIC    2-edge      timer
   8:          0          0          0          0  IR-IO-APIC    8-edge      rtc0
 130:     123456          0          0          0  IR-PCI-MSI 1572864-edge      amdgpu
 131:          0       4242          0          0  IR-PCI-MSI 1048576-edge      nvidia
 135:          9          0          0          0  IR-PCI-MSI 524288-edge      nvme0q0
 140:          0          0         17          0  IR-PCI-MSI 2097152-edge      nouveau
NMI:          0          0          0          0   Non-maskable interrupts
LOC:    1234567    1234567    1234567    1234567   Local timer interrupts
ERR:          0
";
