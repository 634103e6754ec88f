#![cfg(unix)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use repour_core::config::{GradleSettings, RepourConfig};
use repour_core::execution::NullLogSink;
use repour_core::models::{AdjustRequest, RemovedRepository, TaskId, TerminalState};
use repour_core::orchestration::AdjustService;

const FAKE_GRADLEW: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "Gradle 8.5"
  exit 0
fi
[ -f analyzer-init.gradle ] || { echo "init script missing" >&2; exit 7; }
echo "args: $*"
printf '{"group":"org.acme","name":"widget","version":"1.0.0.temporary-redhat-00001"}' > manipulation.json
cat > repos-backup.xml <<'EOF'
<settings>
  <profiles>
    <profile>
      <repositories>
        <repository><id>zeta</id><url>https://zeta.example/maven</url></repository>
        <repository><id>alpha</id><url>https://alpha.example/maven</url></repository>
      </repositories>
    </profile>
  </profiles>
</settings>
EOF
"#;

// Kept as the only test in this binary: the wrapper script is written and then
// executed, which must not race with other tests forking children.
#[tokio::test]
async fn gradle_wrapper_alignment_reports_coordinates_and_removed_repositories() {
    let assets = tempfile::tempdir().unwrap();
    let init_file = assets.path().join("analyzer-init.gradle");
    std::fs::write(&init_file, "// alignment init script\n").unwrap();

    let checkout = tempfile::tempdir().unwrap();
    let module = checkout.path().join("module");
    std::fs::create_dir(&module).unwrap();
    let wrapper = module.join("gradlew");
    std::fs::write(&wrapper, FAKE_GRADLEW).unwrap();
    std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = RepourConfig::default();
    config.adjust.gradle = Some(GradleSettings {
        init_file_path: init_file,
        default_parameters: vec!["-DrepoRemovalBackup=repos-backup.xml".to_string()],
        specific_indy_group: Some("temporary-builds".to_string()),
        timestamp: Some("temporary".to_string()),
    });
    let service = AdjustService::from_config(&config, Arc::new(NullLogSink)).unwrap();

    let report = service
        .run(AdjustRequest {
            task_id: Some(TaskId::new("T1")),
            adjust_strategy: "gradle".to_string(),
            working_directory: checkout.path().to_path_buf(),
            parameters: BTreeMap::from([(
                "ALIGNMENT_PARAMETERS".to_string(),
                "--file=module/build.gradle -DdependencySource=REST".to_string(),
            )]),
            callback_destination: None,
        })
        .await
        .unwrap();

    let outcome = report.outcome;
    assert_eq!(outcome.state(), TerminalState::Succeeded, "{:?}", outcome.error());
    assert_eq!(outcome.adjust_type(), Some("GRADLE"));

    let args_line = outcome
        .log_tail()
        .iter()
        .find(|line| line.starts_with("args: "))
        .unwrap();
    assert!(args_line.contains("generateAlignmentMetadata"));
    assert!(args_line.ends_with(
        "-DrepoRemovalBackup=repos-backup.xml -DversionIncrementalSuffix=temporary-redhat \
         -DrestRepositoryGroup=temporary-builds -DdependencySource=REST"
    ));

    let result = outcome.result().unwrap();
    assert_eq!(result.group_id.as_deref(), Some("org.acme"));
    assert_eq!(result.artifact_id.as_deref(), Some("widget"));
    assert_eq!(result.version.as_deref(), Some("1.0.0.temporary-redhat-00001"));
    assert_eq!(
        result.removed_repositories,
        vec![
            RemovedRepository {
                id: "zeta".to_string(),
                name: None,
                url: "https://zeta.example/maven".to_string(),
                releases: true,
                snapshots: true,
            },
            RemovedRepository {
                id: "alpha".to_string(),
                name: None,
                url: "https://alpha.example/maven".to_string(),
                releases: true,
                snapshots: true,
            },
        ]
    );
}
