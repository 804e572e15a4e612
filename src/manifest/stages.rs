//! Stage vocabulary of the manifest document.
//!
//! A stage is data describing one step the executor performs: its type,
//! options and, where needed, inputs, devices and mounts. Helpers here
//! build the stages shared by several pipeline kinds; kind-specific stages
//! are built next to their pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::blueprint::{GroupCustomization, UserCustomization};
use crate::container::ContainerSpec;
use crate::disk::{sectors, Filesystem, FsKind, PartitionTable, Payload, TableKind};
use crate::ostree::CommitSpec;
use crate::platform::Platform;
use crate::rpmmd::PackageSpec;

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mounts: Option<Value>,
}

impl Stage {
    pub fn new(kind: &str, options: Value) -> Self {
        Self {
            kind: kind.to_string(),
            inputs: None,
            options: if options.is_null() { None } else { Some(options) },
            devices: None,
            mounts: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_devices(mut self, devices: Value) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_mounts(mut self, mounts: Value) -> Self {
        self.mounts = Some(mounts);
        self
    }

    /// Run the stage inside an ostree deployment of `os_name`/`reference`.
    pub fn in_deployment(self, os_name: &str, reference: &str) -> Self {
        self.with_mounts(json!([{
            "name": "ostree.deployment",
            "type": "org.osbuild.ostree.deployment",
            "options": { "deployment": { "osname": os_name, "ref": reference } }
        }]))
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.as_ref().and_then(|options| options.get(key))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

/// The output tree of another pipeline.
pub fn tree_input(pipeline: &str) -> Value {
    json!({
        "type": "org.osbuild.tree",
        "origin": "org.osbuild.pipeline",
        "references": [format!("name:{}", pipeline)]
    })
}

/// A single file from another pipeline's output tree.
pub fn file_input(pipeline: &str, file: &str) -> Value {
    let mut references = Map::new();
    references.insert(format!("name:{}", pipeline), json!({ "file": file }));
    json!({
        "type": "org.osbuild.files",
        "origin": "org.osbuild.pipeline",
        "references": references
    })
}

pub fn packages_input(specs: &[PackageSpec]) -> Value {
    let references: Vec<&str> = specs.iter().map(|spec| spec.checksum.as_str()).collect();
    json!({
        "type": "org.osbuild.files",
        "origin": "org.osbuild.source",
        "references": references
    })
}

pub fn commit_input(spec: &CommitSpec) -> Value {
    let mut references = Map::new();
    references.insert(spec.checksum.clone(), json!({ "ref": spec.reference }));
    json!({
        "type": "org.osbuild.ostree",
        "origin": "org.osbuild.source",
        "references": references
    })
}

pub fn containers_input(specs: &[ContainerSpec]) -> Value {
    let mut references = Map::new();
    for spec in specs {
        references.insert(spec.image_id.clone(), json!({ "name": spec.local_name }));
    }
    json!({
        "type": "org.osbuild.containers",
        "origin": "org.osbuild.source",
        "references": references
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// OS tree stages
// ─────────────────────────────────────────────────────────────────────────────

pub fn rpm_stage(specs: &[PackageSpec], gpg_keys: &[String]) -> Stage {
    let mut options = Map::new();
    if !gpg_keys.is_empty() {
        options.insert("gpgkeys".into(), json!(gpg_keys));
    }
    Stage::new("org.osbuild.rpm", Value::Object(options))
        .with_inputs(json!({ "packages": packages_input(specs) }))
}

pub fn selinux_stage() -> Stage {
    Stage::new(
        "org.osbuild.selinux",
        json!({ "file_contexts": "etc/selinux/targeted/contexts/files/file_contexts" }),
    )
}

pub fn locale_stage(language: &str) -> Stage {
    Stage::new("org.osbuild.locale", json!({ "language": language }))
}

pub fn keymap_stage(keymap: &str) -> Stage {
    Stage::new("org.osbuild.keymap", json!({ "keymap": keymap }))
}

pub fn timezone_stage(zone: &str) -> Stage {
    Stage::new("org.osbuild.timezone", json!({ "zone": zone }))
}

pub fn hostname_stage(hostname: &str) -> Stage {
    Stage::new("org.osbuild.hostname", json!({ "hostname": hostname }))
}

pub fn users_stage(users: &[UserCustomization]) -> Stage {
    let mut entries = Map::new();
    for user in users {
        let mut entry = Map::new();
        if let Some(description) = &user.description {
            entry.insert("description".into(), json!(description));
        }
        if let Some(password) = &user.password {
            entry.insert("password".into(), json!(password));
        }
        if let Some(key) = &user.key {
            entry.insert("key".into(), json!(key));
        }
        if let Some(home) = &user.home {
            entry.insert("home".into(), json!(home));
        }
        if let Some(shell) = &user.shell {
            entry.insert("shell".into(), json!(shell));
        }
        if !user.groups.is_empty() {
            entry.insert("groups".into(), json!(user.groups));
        }
        if let Some(uid) = user.uid {
            entry.insert("uid".into(), json!(uid));
        }
        if let Some(gid) = user.gid {
            entry.insert("gid".into(), json!(gid));
        }
        entries.insert(user.name.clone(), Value::Object(entry));
    }
    Stage::new("org.osbuild.users", json!({ "users": entries }))
}

pub fn groups_stage(groups: &[GroupCustomization]) -> Stage {
    let mut entries = Map::new();
    for group in groups {
        let entry = match group.gid {
            Some(gid) => json!({ "gid": gid }),
            None => json!({}),
        };
        entries.insert(group.name.clone(), entry);
    }
    Stage::new("org.osbuild.groups", json!({ "groups": entries }))
}

pub fn systemd_stage(enabled: &[String], disabled: &[String]) -> Stage {
    let mut options = Map::new();
    if !enabled.is_empty() {
        options.insert("enabled_services".into(), json!(enabled));
    }
    if !disabled.is_empty() {
        options.insert("disabled_services".into(), json!(disabled));
    }
    Stage::new("org.osbuild.systemd", Value::Object(options))
}

pub fn skopeo_stage(specs: &[ContainerSpec]) -> Stage {
    Stage::new(
        "org.osbuild.skopeo",
        json!({
            "destination": {
                "type": "containers-storage",
                "storage-path": "/usr/share/containers/storage"
            }
        }),
    )
    .with_inputs(json!({ "images": containers_input(specs) }))
}

/// fstab entries for every filesystem of `table`, by UUID.
pub fn fstab_stage(table: &PartitionTable) -> Stage {
    let mut filesystems: Vec<Value> = table
        .filesystems()
        .iter()
        .map(|fs| {
            json!({
                "uuid": fs.uuid,
                "vfs_type": fs.kind.as_str(),
                "path": fs.mountpoint,
                "options": fs.fstab_options,
                "freq": fs.fstab_freq,
                "passno": fs.fstab_passno
            })
        })
        .collect();
    filesystems.sort_by_key(|entry| entry["path"].as_str().map(str::to_string));
    Stage::new("org.osbuild.fstab", json!({ "filesystems": filesystems }))
}

/// Kernel command line for a tree booting from `table`.
pub fn kernel_command_line(table: &PartitionTable, extra: &[String]) -> String {
    let mut parts = Vec::new();
    if let Some(uuid) = table.root_filesystem().and_then(|fs| fs.uuid.as_deref()) {
        parts.push(format!("root=UUID={}", uuid));
    }
    parts.extend(extra.iter().cloned());
    parts.join(" ")
}

pub fn grub2_stage(
    table: &PartitionTable,
    platform: &Platform,
    kernel_version: Option<&str>,
    kernel_options: &[String],
) -> Stage {
    let mut options = Map::new();
    if let Some(uuid) = table.root_filesystem().and_then(|fs| fs.uuid.as_deref()) {
        options.insert("root_fs_uuid".into(), json!(uuid));
    }
    if let Some(uuid) = table.boot_filesystem().and_then(|fs| fs.uuid.as_deref()) {
        options.insert("boot_fs_uuid".into(), json!(uuid));
    }
    options.insert("kernel_opts".into(), json!(kernel_options.join(" ")));
    if let Some(vendor) = &platform.uefi_vendor {
        options.insert("uefi".into(), json!({ "vendor": vendor, "unified": true }));
    }
    if let Some(bios) = &platform.bios_platform {
        options.insert("legacy".into(), json!(bios));
    }
    if let Some(version) = kernel_version {
        options.insert(
            "saved_entry".into(),
            json!(format!("ffffffffffffffffffffffffffffffff-{}", version)),
        );
    }
    options.insert("write_cmdline".into(), json!(false));
    Stage::new("org.osbuild.grub2", Value::Object(options))
}

pub fn mkdir_stage(paths: &[&str]) -> Stage {
    let paths: Vec<Value> = paths.iter().map(|path| json!({ "path": path })).collect();
    Stage::new("org.osbuild.mkdir", json!({ "paths": paths }))
}

pub fn truncate_stage(filename: &str, size: u64) -> Stage {
    Stage::new(
        "org.osbuild.truncate",
        json!({ "filename": filename, "size": size.to_string() }),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Disk stages
// ─────────────────────────────────────────────────────────────────────────────

fn loopback(filename: &str, start: u64, size: u64) -> Value {
    json!({
        "type": "org.osbuild.loopback",
        "options": {
            "filename": filename,
            "start": sectors(start),
            "size": sectors(size)
        }
    })
}

/// Device name of partition `index`.
fn partition_device(index: usize) -> String {
    format!("part{}", index + 1)
}

/// Devices for every partition and logical volume of `table` backed by
/// `filename`.
pub fn table_devices(filename: &str, table: &PartitionTable) -> Map<String, Value> {
    let mut devices = Map::new();
    for (index, partition) in table.partitions.iter().enumerate() {
        let name = partition_device(index);
        devices.insert(name.clone(), loopback(filename, partition.start, partition.size));
        if let Some(Payload::Lvm(vg)) = &partition.payload {
            for lv in &vg.logical_volumes {
                devices.insert(
                    lv.name.clone(),
                    json!({
                        "type": "org.osbuild.lvm2.lv",
                        "parent": name,
                        "options": { "volume": lv.name }
                    }),
                );
            }
        }
    }
    devices
}

/// Mounts for every filesystem, parents before children.
pub fn table_mounts(table: &PartitionTable) -> Vec<Value> {
    let mut mounts = Vec::new();
    for (index, partition) in table.partitions.iter().enumerate() {
        match &partition.payload {
            Some(Payload::Filesystem(fs)) => mounts.push((fs.mountpoint.clone(), fs.kind, partition_device(index))),
            Some(Payload::Lvm(vg)) => {
                for lv in &vg.logical_volumes {
                    mounts.push((lv.filesystem.mountpoint.clone(), lv.filesystem.kind, lv.name.clone()));
                }
            }
            None => {}
        }
    }
    mounts.sort_by(|a, b| {
        let depth = |path: &str| path.split('/').filter(|c| !c.is_empty()).count();
        depth(&a.0).cmp(&depth(&b.0)).then_with(|| a.0.cmp(&b.0))
    });
    mounts
        .into_iter()
        .map(|(mountpoint, kind, source)| {
            json!({
                "name": if mountpoint == "/" { "root".to_string() } else { mountpoint.trim_start_matches('/').replace('/', "-") },
                "type": format!("org.osbuild.{}", kind.as_str()),
                "source": source,
                "target": mountpoint
            })
        })
        .collect()
}

/// Write the partition table itself.
pub fn partition_stage(filename: &str, table: &PartitionTable) -> Stage {
    let partitions: Vec<Value> = table
        .partitions
        .iter()
        .map(|partition| {
            let mut entry = Map::new();
            entry.insert("start".into(), json!(sectors(partition.start)));
            entry.insert("size".into(), json!(sectors(partition.size)));
            entry.insert("type".into(), json!(partition.type_code));
            if partition.bootable {
                entry.insert("bootable".into(), json!(true));
            }
            if let Some(uuid) = &partition.uuid {
                entry.insert("uuid".into(), json!(uuid));
            }
            Value::Object(entry)
        })
        .collect();

    let device = json!({
        "device": {
            "type": "org.osbuild.loopback",
            "options": { "filename": filename, "lock": true }
        }
    });

    match table.kind {
        TableKind::Gpt => Stage::new(
            "org.osbuild.sgdisk",
            json!({ "uuid": table.uuid, "partitions": partitions }),
        ),
        TableKind::Dos => Stage::new(
            "org.osbuild.sfdisk",
            json!({ "label": "dos", "uuid": table.uuid, "partitions": partitions }),
        ),
    }
    .with_devices(device)
}

/// LVM creation and mkfs stages for every filesystem of `table`.
pub fn mkfs_stages(filename: &str, table: &PartitionTable) -> Vec<Stage> {
    let devices = table_devices(filename, table);
    let mut stages = Vec::new();

    for (index, partition) in table.partitions.iter().enumerate() {
        let device = partition_device(index);
        let mut partition_devices = Map::new();
        partition_devices.insert("device".into(), devices[&device].clone());
        match &partition.payload {
            Some(Payload::Filesystem(fs)) => {
                stages.push(mkfs_stage(fs, Value::Object(partition_devices)));
            }
            Some(Payload::Lvm(vg)) => {
                let volumes: Vec<Value> = vg
                    .logical_volumes
                    .iter()
                    .map(|lv| json!({ "name": lv.name, "size": lv.size.to_string() }))
                    .collect();
                stages.push(
                    Stage::new("org.osbuild.lvm2.create", json!({ "volumes": volumes }))
                        .with_devices(Value::Object(partition_devices)),
                );
                for lv in &vg.logical_volumes {
                    let mut lv_devices = Map::new();
                    lv_devices.insert("device".into(), devices[&lv.name].clone());
                    lv_devices.insert(device.clone(), devices[&device].clone());
                    stages.push(mkfs_stage(&lv.filesystem, Value::Object(lv_devices)));
                }
            }
            None => {}
        }
    }
    stages
}

fn mkfs_stage(fs: &Filesystem, devices: Value) -> Stage {
    let mut options = Map::new();
    match fs.kind {
        FsKind::Vfat => {
            if let Some(uuid) = &fs.uuid {
                options.insert("volid".into(), json!(uuid.replace('-', "")));
            }
            if let Some(label) = &fs.label {
                options.insert("label".into(), json!(label));
            }
        }
        FsKind::Ext4 | FsKind::Xfs => {
            options.insert("uuid".into(), json!(fs.uuid));
            if let Some(label) = &fs.label {
                options.insert("label".into(), json!(label));
            }
        }
    }
    let kind = match fs.kind {
        FsKind::Vfat => "org.osbuild.mkfs.fat",
        FsKind::Ext4 => "org.osbuild.mkfs.ext4",
        FsKind::Xfs => "org.osbuild.mkfs.xfs",
    };
    Stage::new(kind, Value::Object(options)).with_devices(devices)
}

/// Copy the tree produced by `pipeline` onto the mounted filesystems.
pub fn copy_tree_stage(pipeline: &str, filename: &str, table: &PartitionTable) -> Stage {
    Stage::new(
        "org.osbuild.copy",
        json!({ "paths": [{ "from": "input://root-tree/", "to": "mount://root/" }] }),
    )
    .with_inputs(json!({ "root-tree": tree_input(pipeline) }))
    .with_devices(Value::Object(table_devices(filename, table)))
    .with_mounts(Value::Array(table_mounts(table)))
}
