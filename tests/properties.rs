mod common;

use bl0942::packet::{PACKET_HEADER, PACKET_LEN};
use bl0942::{BL0942Config, BL0942Driver, LatestValue};
use common::{standard_packet, test_calibration, FakeChip, MockDelay};
use proptest::collection::vec;
use proptest::prelude::*;

fn config() -> BL0942Config {
    BL0942Config {
        calibration: test_calibration(),
        ..BL0942Config::default()
    }
}

proptest! {
    #[test]
    fn split_packet_decodes_once(
        junk in vec(any::<u8>().prop_filter("not a header", |b| *b != PACKET_HEADER), 0..40),
        mut splits in vec(0usize..100, 0..8),
    ) {
        let chip = FakeChip::new(0);
        let voltage = LatestValue::new();
        let mut driver = BL0942Driver::new(chip.clone(), MockDelay::default(), config()).unwrap();
        driver.set_voltage_sensor(&voltage);

        let mut stream = junk;
        stream.extend_from_slice(&standard_packet(0, 0));

        for split in splits.iter_mut() {
            *split %= stream.len();
        }
        splits.push(stream.len());
        splits.sort_unstable();

        let mut start = 0;
        for end in splits {
            chip.inject(&stream[start..end]);
            driver.receive().unwrap();
            start = end;
        }

        prop_assert_eq!(voltage.count(), 1);
        let value = voltage.state().unwrap();
        prop_assert!((value - 230.0).abs() < 0.01);
    }

    #[test]
    fn wrong_length_never_publishes(data in vec(any::<u8>(), 0..64)) {
        prop_assume!(data.len() != PACKET_LEN);

        let chip = FakeChip::new(0);
        let voltage = LatestValue::new();
        let mut driver = BL0942Driver::new(chip, MockDelay::default(), config()).unwrap();
        driver.set_voltage_sensor(&voltage);

        prop_assert_eq!(driver.parse_data(&data), None);
        prop_assert_eq!(voltage.count(), 0);
    }

    #[test]
    fn garbage_stream_is_harmless(data in vec(any::<u8>(), 0..256), chunk in 1usize..32) {
        let chip = FakeChip::new(0);
        let voltage = LatestValue::new();
        let mut driver = BL0942Driver::new(chip.clone(), MockDelay::default(), config()).unwrap();
        driver.set_voltage_sensor(&voltage);

        for piece in data.chunks(chunk) {
            chip.inject(piece);
            driver.receive().unwrap();
        }
        prop_assert_eq!(chip.pending_rx(), 0);

        // A clean packet still decodes after whatever came before once the
        // partial buffer is dropped by the next request
        chip.set_packet(standard_packet(0, 0));
        let before = voltage.count();
        driver.update().unwrap();
        driver.receive().unwrap();
        prop_assert_eq!(voltage.count(), before + 1);
    }
}
