//! Esquema Diesel (declarado manualmente; reemplazable con `diesel
//! print-schema`).
//!
//! Tablas:
//! - `flow_definitions` / `flow_nodes` / `flow_connections`: grafo canónico
//!   más el snapshot denormalizado `flow_data`.
//! - `conversation_sessions` / `conversation_history`: sesiones y su
//!   historial append-only.
//! - `flow_execution_steps` / `trace_access_audit`: traza de ejecución y
//!   auditoría de lecturas.
//! - `event_outbox`: eventos de dominio pendientes de despacho.

diesel::table! {
    flow_definitions (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        version -> Varchar,
        entry_node_id -> Varchar,
        flow_data -> Jsonb,
        info -> Jsonb,
        contract -> Nullable<Jsonb>,
        is_published -> Bool,
        is_active -> Bool,
        trace_enabled -> Bool,
        trace_sample_rate -> Int4,
        retention_days -> Int4,
        created_by -> Nullable<Uuid>,
        published_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    flow_nodes (id) {
        id -> Uuid,
        flow_id -> Uuid,
        node_id -> Varchar,
        node_type -> Varchar,
        template -> Nullable<Varchar>,
        content -> Jsonb,
        position -> Jsonb,
        info -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    flow_connections (id) {
        id -> Uuid,
        flow_id -> Uuid,
        source_node_id -> Varchar,
        target_node_id -> Varchar,
        connection_type -> Varchar,
        conditions -> Jsonb,
        info -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    conversation_sessions (id) {
        id -> Uuid,
        flow_id -> Uuid,
        user_id -> Nullable<Uuid>,
        session_token -> Varchar,
        current_node_id -> Nullable<Varchar>,
        state -> Jsonb,
        info -> Jsonb,
        status -> Varchar,
        revision -> Int4,
        trace_enabled -> Bool,
        trace_level -> Varchar,
        state_hash -> Nullable<Varchar>,
        started_at -> Timestamptz,
        last_activity_at -> Timestamptz,
        ended_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    conversation_history (id) {
        id -> Uuid,
        session_id -> Uuid,
        node_id -> Varchar,
        interaction_type -> Varchar,
        content -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    flow_execution_steps (id) {
        id -> Uuid,
        session_id -> Uuid,
        step_number -> Int4,
        node_id -> Varchar,
        node_type -> Varchar,
        state_before -> Jsonb,
        state_after -> Jsonb,
        execution_details -> Jsonb,
        connection_type -> Nullable<Varchar>,
        next_node_id -> Nullable<Varchar>,
        started_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        duration_ms -> Nullable<Int8>,
        error_message -> Nullable<Text>,
        error_details -> Nullable<Jsonb>,
    }
}

diesel::table! {
    trace_access_audit (id) {
        id -> Int8,
        session_id -> Uuid,
        accessed_by -> Nullable<Uuid>,
        access_type -> Varchar,
        ip_address -> Nullable<Varchar>,
        user_agent -> Nullable<Text>,
        data_accessed -> Nullable<Jsonb>,
        accessed_at -> Timestamptz,
    }
}

diesel::table! {
    event_outbox (id) {
        id -> Int8,
        event_type -> Varchar,
        payload -> Jsonb,
        destination -> Varchar,
        priority -> Varchar,
        created_at -> Timestamptz,
        delivered_at -> Nullable<Timestamptz>,
        attempts -> Int4,
        last_error -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(flow_definitions,
                                              flow_nodes,
                                              flow_connections,
                                              conversation_sessions,
                                              conversation_history,
                                              flow_execution_steps,
                                              trace_access_audit,
                                              event_outbox,);
