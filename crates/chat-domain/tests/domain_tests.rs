//! Pruebas de integración del vocabulario de dominio: rutas + merge +
//! plantillas + masking trabajando juntos como lo hace el runtime.

use chat_domain::pii::PiiMasker;
use chat_domain::state::{deep_merge, ensure_roots, get_path, set_path};
use chat_domain::template::{strip_unresolved, substitute, substitute_value};
use chat_domain::types::ConnectionType;
use serde_json::json;

#[test]
fn pending_variables_merge_like_the_runtime_does() {
    // El engine acumula escrituras en un mapa pendiente y luego lo funde
    // sobre el estado: escalares reemplazan, mapas recursan.
    let mut state = json!({"user": {"name": "Ada"}, "temp": {"quiz": [1, 2]}});
    ensure_roots(&mut state);

    let mut pending = json!({});
    set_path(&mut pending, "results.total", json!(20));
    set_path(&mut pending, "user.level", json!("advanced"));

    deep_merge(&mut state, &pending);

    assert_eq!(get_path(&state, "results.total"), Some(&json!(20)));
    assert_eq!(get_path(&state, "user.name"), Some(&json!("Ada")));
    assert_eq!(get_path(&state, "user.level"), Some(&json!("advanced")));
}

#[test]
fn outbound_payload_pipeline_substitute_then_strip() {
    // Un body con un token resoluble y otro que no resuelve.
    let state = json!({"user": {"name": "Ada"}});
    let body = json!({"name": "{{user.name}}", "school_id": "{{context.school_id}}"});

    let substituted = substitute_value(&body, &state);
    let outbound = strip_unresolved(&substituted);

    assert_eq!(outbound, json!({"name": "Ada", "school_id": null}));
}

#[test]
fn masked_state_never_leaks_raw_emails() {
    let masker = PiiMasker::new();
    let state = json!({
        "user": {"email": "kid@school.org", "age": 9},
        "temp": {"note": "contact parent@family.net please"},
    });
    let masked = masker.mask_state(&state);
    let rendered = masked.to_string();
    assert!(!rendered.contains("kid@school.org"));
    assert!(!rendered.contains("parent@family.net"));
    assert!(rendered.contains("[EMAIL]") || rendered.contains("[MASKED:"));
}

#[test]
fn wire_tokens_cover_the_published_table() {
    for (token, expected) in [("DEFAULT", ConnectionType::Default),
                              ("SUCCESS", ConnectionType::Success),
                              ("FAILURE", ConnectionType::Failure),
                              ("$0", ConnectionType::Option0),
                              ("$1", ConnectionType::Option1)]
    {
        assert_eq!(ConnectionType::from_token(token), expected);
        assert_eq!(expected.to_token(), token);
    }
}

#[test]
fn templates_render_inside_message_text() {
    let state = json!({"user": {"name": "Ada"}, "results": {"total": 20}});
    let rendered = substitute("Bien {{user.name}}, sacaste {{results.total}} puntos", &state);
    assert_eq!(rendered, "Bien Ada, sacaste 20 puntos");
}
