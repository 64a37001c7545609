//! Pool topology and dataset hierarchy.
//!
//! Maps a redundancy class and a set of ZFS partitions to the `zpool create`
//! vdev arguments, and owns the fixed dataset hierarchy the pipeline creates.
//! The serialized [`PoolSpec`] is handed to the bootloader collaborator.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{Compression, RedundancyClass};
use crate::exec::Invocation;

/// Vdev argument tokens for pool creation: the redundancy token (when any)
/// followed by every ZFS partition path.
pub fn vdev_arguments(redundancy: RedundancyClass, zfs_partitions: &[PathBuf]) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(token) = redundancy.vdev_token() {
        args.push(token.to_string());
    }
    for partition in zfs_partitions {
        args.push(partition.to_string_lossy().into_owned());
    }
    args
}

/// One dataset in the fixed hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct DatasetSpec {
    /// Path relative to the pool root.
    pub name: &'static str,
    pub props: &'static [(&'static str, &'static str)],
}

/// The fixed dataset hierarchy, parents strictly before children.
pub const DATASET_HIERARCHY: &[DatasetSpec] = &[
    // Boot environment container: never mounted itself.
    DatasetSpec {
        name: "ROOT",
        props: &[("canmount", "off"), ("mountpoint", "none")],
    },
    DatasetSpec {
        name: "ROOT/default",
        props: &[("canmount", "noauto"), ("mountpoint", "/")],
    },
    DatasetSpec {
        name: "home",
        props: &[("mountpoint", "/home")],
    },
    DatasetSpec {
        name: "home/root",
        props: &[("mountpoint", "/root")],
    },
    DatasetSpec {
        name: "var",
        props: &[("canmount", "off"), ("mountpoint", "none")],
    },
    DatasetSpec {
        name: "var/log",
        props: &[("mountpoint", "/var/log")],
    },
    // Cache and scratch data is rebuildable; keep it out of auto-snapshots.
    DatasetSpec {
        name: "var/cache",
        props: &[
            ("mountpoint", "/var/cache"),
            ("com.sun:auto-snapshot", "false"),
        ],
    },
    DatasetSpec {
        name: "var/tmp",
        props: &[
            ("mountpoint", "/var/tmp"),
            ("com.sun:auto-snapshot", "false"),
        ],
    },
    DatasetSpec {
        name: "opt",
        props: &[("mountpoint", "/opt")],
    },
    DatasetSpec {
        name: "srv",
        props: &[("mountpoint", "/srv")],
    },
    DatasetSpec {
        name: "usr",
        props: &[("canmount", "off"), ("mountpoint", "none")],
    },
    DatasetSpec {
        name: "usr/local",
        props: &[("mountpoint", "/usr/local")],
    },
];

/// The boot environment dataset, target of bootfs and the initial snapshot.
pub const BOOT_ENVIRONMENT: &str = "ROOT/default";

/// Everything pool creation needs, plus what downstream consumers derive
/// their paths from.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSpec {
    pub name: String,
    pub ashift: u8,
    pub compression: Compression,
    pub redundancy: RedundancyClass,
    /// ZFS member partitions, in vdev order.
    pub zfs_partitions: Vec<PathBuf>,
    /// Enable autotrim; set when every member device supports discard.
    pub autotrim: bool,
}

impl PoolSpec {
    /// The single `zpool create` invocation. Feature flags required for
    /// bootloader compatibility are enabled here because they cannot be
    /// changed after creation.
    pub fn create_invocation(&self) -> Invocation {
        let mut inv = Invocation::new("zpool")
            .arg("create")
            .arg("-f")
            .args(["-o", &format!("ashift={}", self.ashift)]);

        if self.autotrim {
            inv = inv.args(["-o", "autotrim=on"]);
        }

        inv = inv
            .args(["-o", "feature@encryption=enabled"])
            .args(["-o", "feature@bookmark_v2=enabled"])
            .args(["-O", &format!("compression={}", self.compression)])
            .args(["-O", "acltype=posixacl"])
            .args(["-O", "xattr=sa"])
            .args(["-O", "dnodesize=auto"])
            .args(["-O", "relatime=on"])
            .args(["-O", "canmount=off"])
            .args(["-O", "mountpoint=/"])
            .arg(&self.name);

        inv.args(vdev_arguments(self.redundancy, &self.zfs_partitions))
    }

    /// `zfs create` for one dataset of the fixed hierarchy.
    pub fn dataset_invocation(&self, dataset: &DatasetSpec) -> Invocation {
        let mut inv = Invocation::new("zfs").arg("create");
        for (key, value) in dataset.props {
            inv = inv.args(["-o", &format!("{}={}", key, value)]);
        }
        inv.arg(format!("{}/{}", self.name, dataset.name))
    }

    pub fn set_bootfs_invocation(&self) -> Invocation {
        Invocation::new("zpool")
            .arg("set")
            .arg(format!("bootfs={}/{}", self.name, BOOT_ENVIRONMENT))
            .arg(&self.name)
    }

    pub fn set_cachefile_invocation(&self) -> Invocation {
        Invocation::new("zpool")
            .arg("set")
            .arg("cachefile=/etc/zfs/zpool.cache")
            .arg(&self.name)
    }

    /// Initial snapshot of the boot environment.
    pub fn snapshot_invocation(&self) -> Invocation {
        Invocation::new("zfs")
            .arg("snapshot")
            .arg(format!("{}/{}@initial", self.name, BOOT_ENVIRONMENT))
    }

    pub fn export_invocation(&self) -> Invocation {
        Invocation::new("zpool").arg("export").arg(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn spec(redundancy: RedundancyClass, partitions: &[&str]) -> PoolSpec {
        PoolSpec {
            name: "zroot".to_string(),
            ashift: 12,
            compression: Compression::Zstd,
            redundancy,
            zfs_partitions: parts(partitions),
            autotrim: false,
        }
    }

    #[test]
    fn single_device_vdev_is_just_the_path() {
        assert_eq!(
            vdev_arguments(RedundancyClass::None, &parts(&["/dev/sda3"])),
            vec!["/dev/sda3"]
        );
    }

    #[test]
    fn mirror_vdev_prefixes_token() {
        assert_eq!(
            vdev_arguments(
                RedundancyClass::Mirror,
                &parts(&["/dev/sda3", "/dev/sdb3"])
            ),
            vec!["mirror", "/dev/sda3", "/dev/sdb3"]
        );
    }

    #[test]
    fn raidz_vdev_tokens() {
        for (class, token) in [
            (RedundancyClass::Raidz1, "raidz1"),
            (RedundancyClass::Raidz2, "raidz2"),
            (RedundancyClass::Raidz3, "raidz3"),
        ] {
            let args = vdev_arguments(class, &parts(&["/dev/sda3"]));
            assert_eq!(args[0], token);
        }
    }

    #[test]
    fn hierarchy_lists_parents_before_children() {
        for (i, dataset) in DATASET_HIERARCHY.iter().enumerate() {
            if let Some((parent, _)) = dataset.name.rsplit_once('/') {
                let parent_pos = DATASET_HIERARCHY
                    .iter()
                    .position(|d| d.name == parent)
                    .unwrap_or_else(|| panic!("{} has no parent entry", dataset.name));
                assert!(parent_pos < i, "{} listed before its parent", dataset.name);
            }
        }
    }

    #[test]
    fn containers_are_not_mountable() {
        for name in ["ROOT", "var", "usr"] {
            let ds = DATASET_HIERARCHY.iter().find(|d| d.name == name).unwrap();
            assert!(ds.props.contains(&("canmount", "off")), "{}", name);
        }
    }

    #[test]
    fn rebuildable_datasets_excluded_from_auto_snapshots() {
        let pool = spec(RedundancyClass::None, &["/dev/sda3"]);
        for name in ["var/cache", "var/tmp"] {
            let ds = DATASET_HIERARCHY.iter().find(|d| d.name == name).unwrap();
            assert!(
                ds.props.contains(&("com.sun:auto-snapshot", "false")),
                "{}",
                name
            );
            assert!(pool
                .dataset_invocation(ds)
                .to_string()
                .contains("com.sun:auto-snapshot=false"));
        }
    }

    #[test]
    fn boot_environment_mounts_at_root() {
        let ds = DATASET_HIERARCHY
            .iter()
            .find(|d| d.name == BOOT_ENVIRONMENT)
            .unwrap();
        assert!(ds.props.contains(&("mountpoint", "/")));
    }

    #[test]
    fn create_invocation_carries_fixed_properties() {
        let rendered = spec(RedundancyClass::Mirror, &["/dev/sda3", "/dev/sdb3"])
            .create_invocation()
            .to_string();
        assert!(rendered.starts_with("zpool create"));
        assert!(rendered.contains("ashift=12"));
        assert!(rendered.contains("feature@encryption=enabled"));
        assert!(rendered.contains("feature@bookmark_v2=enabled"));
        assert!(rendered.contains("compression=zstd"));
        assert!(rendered.contains("canmount=off"));
        assert!(rendered.ends_with("zroot mirror /dev/sda3 /dev/sdb3"));
        assert!(!rendered.contains("autotrim"));
    }

    #[test]
    fn create_invocation_adds_autotrim_when_hinted() {
        let mut pool = spec(RedundancyClass::None, &["/dev/sda3"]);
        pool.autotrim = true;
        assert!(pool.create_invocation().to_string().contains("autotrim=on"));
    }

    #[test]
    fn dataset_invocation_renders_properties() {
        let pool = spec(RedundancyClass::None, &["/dev/sda3"]);
        let ds = &DATASET_HIERARCHY[0];
        assert_eq!(
            pool.dataset_invocation(ds).to_string(),
            "zfs create -o canmount=off -o mountpoint=none zroot/ROOT"
        );
    }

    #[test]
    fn finalize_invocations_target_boot_environment() {
        let pool = spec(RedundancyClass::None, &["/dev/sda3"]);
        assert_eq!(
            pool.set_bootfs_invocation().to_string(),
            "zpool set bootfs=zroot/ROOT/default zroot"
        );
        assert_eq!(
            pool.snapshot_invocation().to_string(),
            "zfs snapshot zroot/ROOT/default@initial"
        );
        assert_eq!(pool.export_invocation().to_string(), "zpool export zroot");
    }
}
