//! Property tests: lookups only cache what they find.

use proptest::prelude::*;
use quill_tests::Fixture;

const WALLET: &str = "(type Wallet (field coins Int 3) (method spend () Int coins))";

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn misses_are_never_cached(names in prop::collection::vec("[a-z]{1,8}", 1..12)) {
        let mut fx = Fixture::new().unwrap();
        let wallet = fx.domain.compile_and_load_source(WALLET).unwrap();
        let assembly = fx.domain.assemblies()[0].clone();

        for name in names.iter().filter(|n| *n != "coins" && *n != "spend") {
            prop_assert!(wallet.field(name).is_err());
            prop_assert!(wallet.property(name).is_err());
            prop_assert!(wallet.method(name).is_err());
        }
        prop_assert_eq!(assembly.cached_member_count(), 0);

        prop_assert!(wallet.field("coins").is_ok());
        prop_assert!(wallet.method("spend").is_ok());
        prop_assert_eq!(assembly.cached_member_count(), 2);
    }
}
