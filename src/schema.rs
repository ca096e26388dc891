// Maintained by hand to match the statements in `repository::migrations`.

diesel::table! {
    scraper_state (scraper_name) {
        scraper_name -> Text,
        created_at -> Text,
        updated_at -> Text,
        total_processed -> BigInt,
        total_downloaded -> BigInt,
        total_skipped -> BigInt,
        total_failed -> BigInt,
        custom_values -> Text,
    }
}

diesel::table! {
    processed_urls (id) {
        id -> Integer,
        scraper_name -> Text,
        url -> Text,
        status -> Text,
        metadata -> Text,
        processed_at -> Text,
    }
}

diesel::joinable!(processed_urls -> scraper_state (scraper_name));

diesel::allow_tables_to_appear_in_same_query!(processed_urls, scraper_state,);
