//! Esquema Diesel. Debe coincidir con `migrations/`.

diesel::table! {
    saga_executions (id) {
        id -> Uuid,
        idempotency_key -> Text,
        serialized_job -> Jsonb,
        definition -> Jsonb,
        recover_to -> Text,
        last_run_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    saga_entries (seq) {
        seq -> BigInt,
        execution_id -> Uuid,
        step -> Text,
        action -> Text,
        ts -> Timestamptz,
        data -> Nullable<Jsonb>,
    }
}

diesel::table! {
    saga_values (execution_id, key) {
        execution_id -> Uuid,
        key -> Text,
        value -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(saga_entries -> saga_executions (execution_id));
diesel::joinable!(saga_values -> saga_executions (execution_id));

diesel::allow_tables_to_appear_in_same_query!(saga_executions, saga_entries, saga_values,);
