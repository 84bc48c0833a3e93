// Mirrors the DDL in `turn_store::SCHEMA_SQL`.

diesel::table! {
    conversation_history (id) {
        id -> Integer,
        session_id -> Text,
        turn_number -> Integer,
        role -> Text,
        content -> Text,
        timestamp -> Double,
        created_at -> Text,
    }
}

diesel::table! {
    sessions (session_id) {
        session_id -> Text,
        start_time -> Double,
        start_time_str -> Text,
        last_update -> Double,
        total_turns -> Integer,
    }
}

diesel::allow_tables_to_appear_in_same_query!(conversation_history, sessions,);
