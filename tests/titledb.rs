mod common;

use common::MockFetcher;
use nus_sync::domain::TitleId;
use nus_sync::titledb::{HttpTitleDb, TitleNameLookup, UNKNOWN_TITLE};

const DB_URL: &str = "http://titles.test/xml.php";

#[test]
fn lookup_resolves_uppercase_ids() {
    let fetcher = MockFetcher::default().with(
        DB_URL,
        "<releases><title><titleid>0004000000030800</titleid><name>Some Game</name></title></releases>",
    );
    let names = HttpTitleDb::new(&fetcher, DB_URL).titles();
    let id: TitleId = "0004000000030800".parse().unwrap();
    assert_eq!(names.display_name(&id), "Some Game");
}

#[test]
fn unreachable_database_yields_empty_mapping() {
    let fetcher = MockFetcher::default();
    let names = HttpTitleDb::new(&fetcher, DB_URL).titles();
    assert!(names.is_empty());
    let id: TitleId = "0004000000030800".parse().unwrap();
    assert_eq!(names.display_name(&id), UNKNOWN_TITLE);
}

#[test]
fn malformed_database_yields_empty_mapping() {
    let fetcher = MockFetcher::default().with(DB_URL, "<releases><title></releases>");
    assert!(HttpTitleDb::new(&fetcher, DB_URL).titles().is_empty());
}
