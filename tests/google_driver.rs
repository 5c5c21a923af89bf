//! Behavioural tests for the Google driver against the in-memory Compute
//! Engine double.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use buildvm::google::{ComputeInstance, GoogleDriver, GoogleDriverError};
use buildvm::test_support::{ComputeCall, FakeComputeApi};
use buildvm::{
    BootstrapParams, CloudInitRenderer, Driver, DriverKind, GoogleConfig, InstanceCreateOpts, Os,
    Platform,
};
use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

use test_constants::{DEFAULT_MACHINE_TYPE, TEST_PROJECT};

fn driver_for(config: &GoogleConfig, api: &FakeComputeApi) -> GoogleDriver {
    let renderer = CloudInitRenderer::new(BootstrapParams {
        public_key: String::from("ssh-ed25519 AAAA ci@example"),
        agent_url: None,
        cert_folder: None,
    });
    match GoogleDriver::with_api(config, Arc::new(api.clone()), Arc::new(renderer)) {
        Ok(driver) => driver.with_poll_interval(Duration::from_millis(1)),
        Err(err) => panic!("failed to construct driver: {err}"),
    }
}

#[fixture]
fn api() -> FakeComputeApi {
    FakeComputeApi::new()
}

fn request(os: Os) -> InstanceCreateOpts {
    InstanceCreateOpts::builder()
        .runner_name("Drone Runner")
        .pool_name("ubuntu")
        .platform(Platform {
            os,
            arch: String::from("amd64"),
        })
        .timestamp(1_700_000_000)
        .build()
        .expect("valid request")
}

fn user_data(api: &FakeComputeApi) -> String {
    api.calls()
        .into_iter()
        .find_map(|call| match call {
            ComputeCall::InsertInstance { instance, .. } => instance
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.get("user-data"))
                .map(str::to_owned),
            _ => None,
        })
        .expect("instance insert with user-data")
}

#[rstest]
#[tokio::test]
async fn create_then_destroy_removes_the_vm(api: FakeComputeApi) {
    let config = GoogleConfig::for_project(TEST_PROJECT);
    let driver = driver_for(&config, &api);

    let instance = driver.create(&request(Os::Linux), &CancellationToken::new()).await.expect("create");
    assert_eq!(instance.provider, DriverKind::Google);
    assert_eq!(instance.size, DEFAULT_MACHINE_TYPE);
    assert!(instance.name.starts_with("dronerunner-ubuntu-1700000000-"));
    assert!(api.instance(&instance.zone, &instance.id).is_some());

    driver
        .destroy(std::slice::from_ref(&instance.id), &CancellationToken::new())
        .await
        .expect("destroy");
    assert!(api.instance(&instance.zone, &instance.id).is_none());
}

#[rstest]
#[case(Os::Linux, "#cloud-config")]
#[case(Os::Windows, "<powershell>")]
#[tokio::test]
async fn payload_follows_the_requested_platform(
    api: FakeComputeApi,
    #[case] os: Os,
    #[case] header: &str,
) {
    let driver = driver_for(&GoogleConfig::for_project(TEST_PROJECT), &api);
    driver.create(&request(os), &CancellationToken::new()).await.expect("create");
    assert!(user_data(&api).starts_with(header));
}

#[rstest]
#[tokio::test]
async fn custom_user_data_key_is_honoured(api: FakeComputeApi) {
    let config = GoogleConfig {
        user_data_key: String::from("startup-script"),
        ..GoogleConfig::for_project(TEST_PROJECT)
    };
    let driver = driver_for(&config, &api);
    let instance = driver.create(&request(Os::Linux), &CancellationToken::new()).await.expect("create");

    let stored = api
        .instance(&instance.zone, &instance.id)
        .and_then(|vm| vm.metadata)
        .expect("metadata");
    assert!(stored.get("startup-script").is_some());
    assert!(stored.get("user-data").is_none());
}

#[rstest]
#[tokio::test]
async fn tags_are_merged_into_live_metadata(api: FakeComputeApi) {
    let driver = driver_for(&GoogleConfig::for_project(TEST_PROJECT), &api);
    let instance = driver.create(&request(Os::Linux), &CancellationToken::new()).await.expect("create");

    let tags = BTreeMap::from([(String::from("stage"), String::from("build"))]);
    driver.set_tags(&instance, &tags, &CancellationToken::new()).await.expect("set tags");

    let stored = api
        .instance(&instance.zone, &instance.id)
        .and_then(|vm| vm.metadata)
        .expect("metadata");
    assert_eq!(stored.get("stage"), Some("build"));
    assert!(stored.get("user-data").is_some());
}

#[rstest]
#[tokio::test]
async fn destroy_searches_every_configured_zone(api: FakeComputeApi) {
    let config = GoogleConfig {
        zones: String::from("europe-west1-b,europe-west1-c,europe-west1-d"),
        ..GoogleConfig::for_project(TEST_PROJECT)
    };
    api.add_instance(
        "europe-west1-d",
        ComputeInstance {
            id: String::from("9001"),
            name: String::from("stray"),
            ..ComputeInstance::default()
        },
    );
    let driver = driver_for(&config, &api);

    driver
        .destroy(&[String::from("9001")], &CancellationToken::new())
        .await
        .expect("destroy");

    let lookups: Vec<String> = api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ComputeCall::GetInstance { zone, .. } => Some(zone),
            _ => None,
        })
        .collect();
    assert_eq!(
        lookups,
        vec![
            String::from("europe-west1-b"),
            String::from("europe-west1-c"),
            String::from("europe-west1-d"),
        ]
    );
    assert!(api.instance("europe-west1-d", "9001").is_none());
}

#[rstest]
#[tokio::test]
async fn destroy_rejects_an_empty_batch(api: FakeComputeApi) {
    let driver = driver_for(&GoogleConfig::for_project(TEST_PROJECT), &api);
    assert_eq!(driver.destroy(&[], &CancellationToken::new()).await, Err(GoogleDriverError::NoInstanceIds));
}

#[rstest]
#[tokio::test]
async fn unsupported_operations_report_their_name(api: FakeComputeApi) {
    let driver = driver_for(&GoogleConfig::for_project(TEST_PROJECT), &api);
    assert!(!driver.can_hibernate());
    assert_eq!(driver.logs("1").await, Ok(String::new()));
    let err = driver.start("1", "ubuntu").await.expect_err("unsupported");
    assert_eq!(err.to_string(), "start is not supported by the google driver");
}

#[rstest]
fn region_is_derived_from_zone(api: FakeComputeApi) {
    let driver = driver_for(&GoogleConfig::for_project(TEST_PROJECT), &api);
    assert_eq!(driver.region_of("asia-east1-a"), "asia-east1");
    assert_eq!(driver.root_dir(), "/tmp/buildvm");
}
