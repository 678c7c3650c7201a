use meshop_core::{EffectiveConfiguration, Linkerd, LinkerdSpec, SelfSignedCertificates};
use meshop_resources::{
    controller, destination, heartbeat, identity, prometheus, proxy_injector, psp, serviceprofile, tap, trafficsplit, web,
    Subsystem,
};

fn config() -> EffectiveConfiguration {
    let mut l = Linkerd::new(
        "linkerd",
        LinkerdSpec {
            version: "2.8.1".into(),
            self_signed_certificates: Some(SelfSignedCertificates {
                trust_anchors_pem: "-----BEGIN CERTIFICATE-----\nROOT\n-----END CERTIFICATE-----".into(),
                key_pem: "KEY".into(),
                crt_pem: "CRT".into(),
            }),
            ..Default::default()
        },
    );
    l.metadata.namespace = Some("mesh".into());
    l.metadata.uid = Some("0c0ffee0-0000-0000-0000-000000000042".into());
    EffectiveConfiguration::resolve(&l).unwrap()
}

fn all() -> Vec<Subsystem> {
    vec![
        controller::subsystem(),
        destination::subsystem(),
        heartbeat::subsystem(),
        identity::subsystem(),
        prometheus::subsystem(),
        proxy_injector::subsystem(),
        web::subsystem(),
        tap::subsystem(),
        psp::subsystem(),
        serviceprofile::subsystem(),
        trafficsplit::subsystem(),
    ]
}

#[test]
fn every_subsystem_renders() {
    let cfg = config();
    for s in all() {
        let built = s.render(&cfg).unwrap_or_else(|e| panic!("{} failed: {e}", s.name));
        assert!(!built.is_empty(), "{} built nothing", s.name);
    }
}

#[test]
fn owner_reference_only_inside_record_namespace() {
    let cfg = config();
    for s in all() {
        for (m, _) in s.render(&cfg).unwrap() {
            let owners = m.object().metadata.owner_references.clone().unwrap_or_default();
            let inside = m.key().namespace.as_deref() == Some("mesh");
            assert_eq!(owners.len(), usize::from(inside), "{}", m.key());
            if inside {
                assert_eq!(owners[0].kind, "Linkerd");
                assert_eq!(owners[0].controller, Some(true));
            }
        }
    }
}

#[test]
fn every_object_is_labelled_with_control_plane_namespace() {
    let cfg = config();
    for s in all() {
        for (m, _) in s.render(&cfg).unwrap() {
            let labels = m.object().metadata.labels.clone().unwrap_or_default();
            assert_eq!(labels.get("linkerd.io/control-plane-ns").map(String::as_str), Some("mesh"), "{}", m.key());
        }
    }
}

#[test]
fn keys_are_unique_across_subsystems() {
    let cfg = config();
    let mut keys: Vec<String> = all()
        .iter()
        .flat_map(|s| s.render(&cfg).unwrap())
        .map(|(m, _)| m.key().to_string())
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
}

#[test]
fn webhook_bundle_matches_trust_anchors() {
    let cfg = config();
    let m = proxy_injector::webhook_configuration(&cfg).unwrap();
    let v = serde_json::to_value(m.object()).unwrap();
    let bundle = v["webhooks"][0]["clientConfig"]["caBundle"].as_str().unwrap();
    use base64::Engine as _;
    let decoded = base64::engine::general_purpose::STANDARD.decode(bundle).unwrap();
    assert_eq!(decoded, cfg.certificates.trust_anchors_pem.as_bytes());
}

#[test]
fn heartbeat_and_psp_names() {
    let cfg = config();
    let names = |s: Subsystem| -> Vec<String> { s.render(&cfg).unwrap().into_iter().map(|(m, _)| m.key().to_string()).collect() };
    assert_eq!(
        names(heartbeat::subsystem()),
        vec![
            "ServiceAccount mesh/linkerd-heartbeat",
            "Role mesh/linkerd-heartbeat",
            "RoleBinding mesh/linkerd-heartbeat",
            "CronJob mesh/linkerd-heartbeat",
        ]
    );
    assert_eq!(
        names(psp::subsystem()),
        vec!["PodSecurityPolicy linkerd-control-plane", "Role mesh/linkerd-psp", "RoleBinding mesh/linkerd-psp"]
    );
}

#[test]
fn absent_toggle_reaches_every_production() {
    let cfg = config();
    let rendered = tap::subsystem().with_state(meshop_core::DesiredState::Absent).render(&cfg).unwrap();
    assert!(rendered.iter().all(|(_, s)| *s == meshop_core::DesiredState::Absent));
}
