diesel::table! {
    notification_history (id) {
        id -> Integer,
        user_id -> Text,
        kind -> Text,
        slot_key -> Text,
        scheduled_for -> BigInt,
        status -> Text,
        content -> Nullable<Text>,
        created_at -> BigInt,
        sent_at -> Nullable<BigInt>,
        error -> Nullable<Text>,
    }
}
