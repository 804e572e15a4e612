//! A deployed ostree commit, ready to be copied onto a disk.

use serde_json::{json, Map, Value};

use super::pipeline::{PipelineBehaviour, ResolvedInputs};
use super::stages::{
    commit_input, fstab_stage, grub2_stage, groups_stage, kernel_command_line, mkdir_stage,
    users_stage, Stage,
};
use super::Manifest;
use crate::blueprint::{GroupCustomization, UserCustomization};
use crate::disk::PartitionTable;
use crate::error::PlanError;
use crate::ostree::{CommitSource, Remote};
use crate::platform::Platform;

const REPO_PATH: &str = "/ostree/repo";

#[derive(Debug, Clone)]
pub struct OstreeDeployment {
    pub platform: Platform,
    pub commit: CommitSource,
    pub os_name: String,
    pub remote: Remote,
    pub partition_table: PartitionTable,
    pub kernel_options: Vec<String>,
    pub users: Vec<UserCustomization>,
    pub groups: Vec<GroupCustomization>,
    pub ignition: bool,
}

impl OstreeDeployment {
    pub fn new(
        platform: Platform,
        commit: CommitSource,
        remote: Remote,
        partition_table: PartitionTable,
    ) -> Self {
        Self {
            platform,
            commit,
            os_name: "redhat".to_string(),
            remote,
            partition_table,
            kernel_options: Vec::new(),
            users: Vec::new(),
            groups: Vec::new(),
            ignition: false,
        }
    }

    fn deployment_kernel_options(&self) -> Vec<String> {
        let mut options = vec![kernel_command_line(&self.partition_table, &self.kernel_options)];
        if self.ignition {
            options.extend(
                ["coreos.no_persist_ip", "ignition.platform.id=metal", "$ignition_firstboot"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        options
    }

    fn in_deployment(&self, stage: Stage) -> Stage {
        stage.in_deployment(&self.os_name, &self.commit.reference)
    }
}

impl PipelineBehaviour for OstreeDeployment {
    fn build_packages(&self, _manifest: &Manifest) -> Vec<String> {
        vec!["rpm-ostree".to_string()]
    }

    fn commit_sources(&self) -> Vec<CommitSource> {
        vec![self.commit.clone()]
    }

    fn resolve(&self, pipeline: &str, inputs: &mut ResolvedInputs) -> Result<(), PlanError> {
        if inputs.commits.is_empty() {
            return Err(PlanError::missing(
                pipeline,
                format!("ostree commit '{}'", self.commit.reference),
            ));
        }
        Ok(())
    }

    fn stages(&self, _manifest: &Manifest, resolved: &ResolvedInputs) -> Vec<Stage> {
        let Some(commit) = resolved.commits.first() else {
            return Vec::new();
        };
        let reference = &self.commit.reference;
        let kernel_options = self.deployment_kernel_options();
        let mut stages = vec![
            Stage::new("org.osbuild.ostree.init-fs", Value::Null),
            Stage::new(
                "org.osbuild.ostree.pull",
                json!({ "repo": REPO_PATH, "remote": self.remote.name }),
            )
            .with_inputs(json!({ "commits": commit_input(commit) })),
            Stage::new("org.osbuild.ostree.os-init", json!({ "osname": self.os_name })),
            mkdir_stage(&["/boot/efi"]),
            Stage::new(
                "org.osbuild.ostree.deploy",
                json!({
                    "osname": self.os_name,
                    "ref": reference,
                    "remote": self.remote.name,
                    "mounts": ["/boot", "/boot/efi"],
                    "rootfs": { "label": "root" },
                    "kernel_opts": kernel_options,
                }),
            ),
        ];

        let mut remote = Map::new();
        remote.insert("name".into(), json!(self.remote.name));
        let url = if self.remote.url.is_empty() { &commit.url } else { &self.remote.url };
        remote.insert("url".into(), json!(url));
        if let Some(content_url) = &self.remote.content_url {
            remote.insert("contenturl".into(), json!(content_url));
        }
        if !self.remote.gpg_key_paths.is_empty() {
            remote.insert("gpgkeypaths".into(), json!(self.remote.gpg_key_paths));
        }
        stages.push(Stage::new(
            "org.osbuild.ostree.remotes",
            json!({ "repo": REPO_PATH, "remotes": [Value::Object(remote)] }),
        ));

        let deployment = json!({ "osname": self.os_name, "ref": reference });
        stages.push(Stage::new(
            "org.osbuild.ostree.fillvar",
            json!({ "deployment": deployment }),
        ));
        stages.push(self.in_deployment(Stage::new(
            "org.osbuild.ostree.config",
            json!({
                "repo": REPO_PATH,
                "config": { "sysroot": { "readonly": false, "bootloader": "none" } }
            }),
        )));
        stages.push(self.in_deployment(fstab_stage(&self.partition_table)));

        if !self.users.is_empty() {
            stages.push(self.in_deployment(users_stage(&self.users)));
        }
        if !self.groups.is_empty() {
            stages.push(self.in_deployment(groups_stage(&self.groups)));
        }
        if self.ignition {
            stages.push(Stage::new(
                "org.osbuild.ignition",
                json!({ "network": ["systemd.firstboot=off", "systemd.condition-first-boot=true"] }),
            ));
        }
        if !self.users.iter().any(|user| user.name == "root") {
            stages.push(self.in_deployment(Stage::new(
                "org.osbuild.users",
                json!({ "users": { "root": { "password": "!locked" } } }),
            )));
        }

        let mut grub = grub2_stage(&self.partition_table, &self.platform, None, &kernel_options);
        if let Some(Value::Object(options)) = grub.options.as_mut() {
            options.insert("greenboot".into(), json!(true));
            options.insert("ignition".into(), json!(self.ignition));
            options.insert(
                "config".into(),
                json!({ "default": "saved", "timeout": 1, "terminal_output": ["console"] }),
            );
        }
        stages.push(self.in_deployment(grub));

        stages.push(Stage::new(
            "org.osbuild.ostree.selinux",
            json!({ "deployment": deployment }),
        ));
        stages
    }
}
