mod common;

use tailburrow::app::BurrowError;
use tailburrow::domain::{NewItem, Source};
use tailburrow::library;
use tailburrow::store::Store;

use common::*;

#[test]
fn test_failed_trash_puts_file_back() {
    let fx = Fixture::new();
    let store = FaultyStore::new();
    let rel = fx.library.place_file("painter_e621_1.png", b"data").unwrap();
    let id = store.insert(&NewItem::new(Source::E621, "1", rel.clone())).unwrap();

    store.fail("soft_delete");
    let result = library::trash_item(&store, &fx.library, id);

    assert!(matches!(result, Err(BurrowError::Storage(_))));
    assert!(fx.library.absolute(&rel).is_file());
    assert!(!fx.dir.path().join(".trash").join(&rel).exists());
    assert!(!store.get_item(id).unwrap().unwrap().is_trashed());
}

#[test]
fn test_failed_restore_keeps_file_in_trash() {
    let fx = Fixture::new();
    let store = FaultyStore::new();
    let rel = fx.library.place_file("painter_e621_2.png", b"data").unwrap();
    let id = store.insert(&NewItem::new(Source::E621, "2", rel.clone())).unwrap();
    library::trash_item(&store, &fx.library, id).unwrap();

    store.fail("restore");
    let result = library::restore_item(&store, &fx.library, id);

    assert!(matches!(result, Err(BurrowError::Storage(_))));
    assert!(!fx.library.absolute(&rel).exists());
    assert!(fx.dir.path().join(".trash").join(&rel).is_file());
    assert!(store.get_item(id).unwrap().unwrap().is_trashed());
}
