diesel::table! {
    notification_preferences (user_id) {
        user_id -> Text,
        is_enabled -> Bool,
        push_enabled -> Bool,
        email_enabled -> Bool,
        whatsapp_enabled -> Bool,
        whatsapp_number -> Nullable<Text>,
        morning_reminder -> Bool,
        checkin_reminder -> Bool,
        start_hour -> Integer,
        end_hour -> Integer,
        allowed_days -> Text,
        timezone -> Text,
        morning_time -> Text,
        updated_at -> BigInt,
    }
}

diesel::table! {
    checkin_schedules (user_id) {
        user_id -> Text,
        enabled -> Bool,
        frequency -> Text,
        schedules_json -> Text,
        randomize -> Bool,
        skip_weekends -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}
