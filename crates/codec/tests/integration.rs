//! Property tests for the payload codec

use proptest::prelude::*;

proptest! {
    #[test]
    fn round_trip(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
        let compressed = upd_codec::compress(&data).unwrap();
        let back = upd_codec::decompress(&compressed).unwrap();
        prop_assert_eq!(back, data);
    }

    /// Arbitrary non-codec bytes never decompress successfully (and never
    /// panic). A zlib header is two bytes, so anything shorter than three
    /// bytes that is not empty is trivially malformed too.
    #[test]
    fn garbage_never_succeeds(data in proptest::collection::vec(any::<u8>(), 1..512)) {
        // Skip inputs that happen to start like a zlib header; the remaining
        // space is what matters for the "fails cleanly" guarantee.
        prop_assume!(data[0] != 0x78);
        prop_assert!(upd_codec::decompress(&data).is_err());
    }
}
