//! Periodic heartbeat: a CronJob instead of a long-running workload.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;

use crate::templates::{self, named_rule};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "heartbeat";
pub const SERVICE_ACCOUNT: &str = "linkerd-heartbeat";
pub const ROLE: &str = "linkerd-heartbeat";
pub const ROLE_BINDING: &str = "linkerd-heartbeat";
pub const CRON_JOB: &str = "linkerd-heartbeat";

pub fn subsystem() -> Subsystem {
    Subsystem::new(COMPONENT)
        .present("service-account", service_account)
        .present("role", role)
        .present("role-binding", role_binding)
        .present("cron-job", cron_job)
}

pub fn service_account(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::service_account(SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![named_rule(&[""], &["configmaps"], &["get"], &[templates::CONFIG_MAP])];
    templates::managed(&templates::role(ROLE, COMPONENT, rules, cfg))
}

pub fn role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let subjects = vec![templates::service_account_subject(SERVICE_ACCOUNT, cfg)];
    templates::managed(&templates::role_binding(ROLE_BINDING, ROLE, subjects, COMPONENT, cfg))
}

fn validate_schedule(schedule: &str) -> Result<(), BuildError> {
    if schedule.split_whitespace().count() == 5 {
        Ok(())
    } else {
        Err(BuildError::Schedule(schedule.to_string()))
    }
}

pub fn cron_job(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let hb = &cfg.heartbeat;
    validate_schedule(&hb.schedule)?;
    let args = vec![
        "heartbeat".to_string(),
        templates::prometheus_url_arg(cfg),
        templates::controller_namespace_arg(cfg),
        templates::log_level_arg(cfg),
    ];
    let mut container = templates::control_container(COMPONENT, &hb.component, cfg, args);
    container.volume_mounts = None;

    let settings = &hb.component;
    let mut annotations = templates::created_by(cfg);
    annotations.extend(settings.pod_annotations.clone());
    let pod = PodTemplateSpec {
        metadata: Some(ObjectMeta { labels: Some(templates::workload_labels(COMPONENT, cfg)), annotations: Some(annotations), ..Default::default() }),
        spec: Some(PodSpec {
            service_account_name: Some(SERVICE_ACCOUNT.into()),
            restart_policy: Some("Never".into()),
            containers: vec![container],
            node_selector: (!settings.node_selector.is_empty()).then(|| settings.node_selector.clone()),
            affinity: settings.affinity.clone(),
            tolerations: (!settings.tolerations.is_empty()).then(|| settings.tolerations.clone()),
            ..Default::default()
        }),
    };
    let job = CronJob {
        metadata: templates::namespaced(CRON_JOB, templates::workload_labels(COMPONENT, cfg), cfg),
        spec: Some(CronJobSpec {
            schedule: hb.schedule.clone(),
            successful_jobs_history_limit: Some(0),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(templates::workload_labels(COMPONENT, cfg)), ..Default::default() }),
                spec: Some(JobSpec { template: pod, ..Default::default() }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    templates::managed(&job)
}
