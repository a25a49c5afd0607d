//! Per-language end-to-end matrix.
//!
//! Runs every language's bundled starter template through a real sandbox
//! and expects the canonical greeting back. Needs a docker daemon and the
//! base images, so the whole suite is ignored by default:
//!
//! ```text
//! cargo test -p kiln-core --test languages_e2e -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use kiln_core::languages::{self, TEMPLATES};
use kiln_core::profile::profile_for_machine;
use kiln_core::sandbox::manager::ContainerManager;
use kiln_core::sandbox::{ContainerStatus, ContainerTestStatus, SandboxRequest};

async fn run_template(code: &str) {
    let template = TEMPLATES
        .get(code)
        .unwrap_or_else(|| panic!("language {code} has no starter template"));

    let id = uuid::Uuid::new_v4().to_string();
    let request = SandboxRequest {
        scratch_path: std::env::temp_dir().join("executions").join("raw").join(&id),
        id,
        profile: profile_for_machine(),
        source_code: template.to_string(),
        language: languages::by_code(code).unwrap(),
        test: None,
    };

    let docker = Docker::connect_with_local_defaults().expect("docker is required");
    let manager = Arc::new(ContainerManager::new(docker, 10));

    let event_loop = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start().await })
    };

    let (container_id, complete) = manager
        .add_container(request)
        .await
        .expect("container must start");

    tokio::time::timeout(Duration::from_secs(180), complete)
        .await
        .expect("execution must complete before the harness deadline")
        .expect("completion signal must fire");

    let response = manager
        .get_response(&container_id)
        .await
        .expect("a completed container has a response");

    manager.remove_container(&container_id, false).await.unwrap();
    manager.stop();
    event_loop.await.unwrap();

    assert_eq!(
        response.status,
        ContainerStatus::Finished,
        "{code} template failed: compiler output {:?}, stderr {:?}",
        response.compiler_output,
        response.output_err
    );
    assert_eq!(response.test_status, ContainerTestStatus::NoTest);
    assert_eq!(response.output, vec!["Hello, World!".to_string()], "{code} output");
}

macro_rules! language_template_test {
    ($name:ident, $code:literal) => {
        #[ignore]
        #[tokio::test]
        async fn $name() {
            run_template($code).await;
        }
    };
}

language_template_test!(python_template_runs, "python");
language_template_test!(node_template_runs, "node");
language_template_test!(c_template_compiles_and_runs, "c");
language_template_test!(cpp_template_compiles_and_runs, "cpp");
language_template_test!(rust_template_compiles_and_runs, "rust");
language_template_test!(go_template_compiles_and_runs, "go");
language_template_test!(java_template_compiles_and_runs, "java");
