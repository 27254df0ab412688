diesel::table! {
    user_conversation_states (user_id) {
        user_id -> Text,
        state -> Text,
        data -> Text,
        updated_at -> BigInt,
    }
}
