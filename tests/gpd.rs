//! Building, saving and re-reading GPD files.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use xcontent::gpd::{
    Achievement, AchievementFlags, AchievementType, Endian, EntryRow, Gpd, Namespace, Setting,
    SettingValue, Title,
};

fn achievement(id: u32, gamerscore: i32) -> Achievement {
    let mut a = Achievement {
        id,
        image_id: id,
        gamerscore,
        name: format!("Achievement {id}"),
        unlocked_description: "Earned".into(),
        locked_description: "Not yet".into(),
        ..Default::default()
    };
    a.set_achievement_type(AchievementType::Completion);
    a
}

fn dashboard(endian: Endian) -> Gpd {
    let mut gpd = Gpd::create(endian);
    for id in 1..=4 {
        gpd.add_achievement(&achievement(id, 10 * id as i32));
    }

    let mut title = Title::new(0x4d53_07e6, "Halo 3");
    title.achievement_count = 4;
    title.gamerscore_total = 100;
    gpd.add_title(&title);

    let mut setting = Setting::new(0x1004_0006);
    setting.set_string("Motto");
    gpd.add_setting(&setting);

    gpd.add_image(0x8000, vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    gpd.add_string(0x20, "Title name");
    gpd
}

#[test]
fn unmodified_store_saves_byte_identical() {
    for endian in [Endian::Big, Endian::Little] {
        let bytes = dashboard(endian).to_bytes();
        let reparsed = Gpd::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed.endian(), endian);
        assert_eq!(reparsed.to_bytes(), bytes);
    }
}

#[test]
fn unlock_survives_save_and_reload() {
    let mut gpd = dashboard(Endian::Big);
    let when = Utc.with_ymd_and_hms(2013, 8, 1, 20, 0, 0).unwrap();
    assert!(gpd.unlock_achievement(3, Some(when)));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile").join("4D5307E6.gpd");
    gpd.save_file(&path).unwrap();

    let back = Gpd::open(&path).unwrap();
    let a = back.achievement(3).unwrap();
    assert!(a.flags.contains(AchievementFlags::EARNED));
    assert_eq!(a.unlocked_at(), Some(when));
    assert_eq!(back.total_gamerscore(), 30);
    assert_eq!(back.unlocked_count(), 1);
    assert_eq!(back.possible_gamerscore(), 100);
    assert_eq!(back.achievement_count(), 4);
}

#[test]
fn typed_records_read_back() {
    let back = Gpd::from_bytes(&dashboard(Endian::Big).to_bytes()).unwrap();

    let titles = back.titles();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].name, "Halo 3");
    assert_eq!(titles[0].gamerscore_total, 100);

    let settings = back.settings();
    assert_eq!(settings[0].value(), Some(SettingValue::String("Motto".into())));

    let images = back.images();
    assert_eq!(images[0].id, 0x8000);
    assert!(images[0].is_png());

    assert_eq!(back.strings()[0].value, "Title name");
    assert!(back.invalid_entries().is_empty());
}

#[test]
fn corrupt_achievement_is_isolated() {
    let gpd = dashboard(Endian::Big);
    let mut bytes = gpd.to_bytes();

    // shrink the struct size field of the second achievement below the minimum
    let row = gpd.entries()[1];
    let data_start = 24 + 512 * 18 + 512 * 8;
    let at = data_start + row.offset as usize;
    bytes[at..at + 4].copy_from_slice(&4u32.to_be_bytes());

    let back = Gpd::from_bytes(&bytes).unwrap();
    assert_eq!(back.achievement_count(), 3);
    assert_eq!(back.all_achievements().len(), 4);

    let invalid = back.invalid_entries();
    assert_eq!(invalid.achievements.len(), 1);
    let reason = invalid.achievements[0].validation_error.as_deref().unwrap();
    assert!(!reason.is_empty());
    assert!(back.achievement(row.id as u32).is_none());
}

#[test]
fn entry_past_data_section_is_invalid_not_fatal() {
    let gpd = dashboard(Endian::Big);
    let mut bytes = gpd.to_bytes();

    // point the title row far past the end of the data
    let index = gpd
        .entries()
        .iter()
        .position(|r| r.is_in(Namespace::Title))
        .unwrap();
    let row_at = 24 + index * EntryRow::SIZE;
    bytes[row_at + 0xa..row_at + 0xe].copy_from_slice(&0x00ff_0000u32.to_be_bytes());

    let back = Gpd::from_bytes(&bytes).unwrap();
    assert!(back.titles().is_empty());
    assert_eq!(back.all_titles().len(), 1);
    assert_eq!(back.achievement_count(), 4);
}

#[test]
fn entry_length_past_data_section_is_invalid() {
    let gpd = dashboard(Endian::Big);
    let mut bytes = gpd.to_bytes();

    for ns in [Namespace::Achievement, Namespace::Title] {
        let index = gpd.entries().iter().position(|r| r.is_in(ns)).unwrap();
        let row = gpd.entries()[index];
        let row_at = 24 + index * EntryRow::SIZE;
        bytes[row_at + 0xe..row_at + 0x12].copy_from_slice(&(row.length + 0x1000).to_be_bytes());
    }

    let back = Gpd::from_bytes(&bytes).unwrap();
    let invalid = back.invalid_entries();
    assert_eq!(invalid.achievements.len(), 1);
    assert_eq!(invalid.achievements[0].id, 1);
    assert_eq!(invalid.titles.len(), 1);
    assert_eq!(invalid.titles[0].id, 0x4d53_07e6);

    assert_eq!(back.achievement_count(), 3);
    assert!(back.titles().is_empty());
}

fn text() -> impl Strategy<Value = String> {
    proptest::collection::vec(proptest::char::range('!', '~'), 0..24)
        .prop_map(|c| c.into_iter().collect())
}

prop_compose! {
    fn any_achievement()(
        id in any::<u32>(),
        image_id in any::<u32>(),
        gamerscore in 0..=250i32,
        flags in any::<u32>(),
        unlock_time in any::<i64>(),
        name in text(),
        unlocked_description in text(),
        locked_description in text(),
    ) -> Achievement {
        Achievement {
            id,
            image_id,
            gamerscore,
            flags: AchievementFlags::from_bits_retain(flags),
            unlock_time,
            name,
            unlocked_description,
            locked_description,
            validation_error: None,
        }
    }
}

proptest! {
    #[test]
    fn added_records_survive_save(
        achievements in proptest::collection::vec(any_achievement(), 0..20),
        strings in proptest::collection::vec(text(), 0..5),
        little in any::<bool>(),
    ) {
        let endian = if little { Endian::Little } else { Endian::Big };
        let mut gpd = Gpd::create(endian);
        for a in &achievements {
            gpd.add_achievement(a);
        }
        for (i, s) in strings.iter().enumerate() {
            gpd.add_string(i as u64 + 0x100, s);
        }

        let bytes = gpd.to_bytes();
        let back = Gpd::from_bytes(&bytes).unwrap();

        prop_assert_eq!(back.all_achievements(), achievements);
        let values: Vec<String> = back.strings().into_iter().map(|s| s.value).collect();
        prop_assert_eq!(values, strings);
        prop_assert_eq!(back.to_bytes(), bytes);
    }
}
