diesel::table! {
    behavior_checkins (id) {
        id -> Integer,
        user_id -> Text,
        checkin_type -> Text,
        value -> Integer,
        triggered_by -> Text,
        created_at -> BigInt,
    }
}
