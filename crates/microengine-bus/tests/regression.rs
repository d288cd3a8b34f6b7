//! End-to-end regression scenario for the banked-memory carve-out.

use microengine_bus::{ByteBus, ByteBusConfig};

/// With `common=0xC000` and banking enabled: a byte written at 0x8000 in
/// bank 1 is not visible from bank 2, but a byte written at 0xE000 (above
/// the common watermark) is visible from every bank.
#[test]
fn bank_carveout_and_common_watermark() {
    let mut bus = ByteBus::new(ByteBusConfig {
        banks: 4,
        common: 0xC000,
        banked: true,
        ..ByteBusConfig::default()
    });

    bus.select_bank(1);
    bus.write_byte(0x8000, 0x11);
    bus.select_bank(2);
    bus.write_byte(0x8000, 0x22);
    bus.select_bank(1);
    assert_eq!(bus.read_byte(0x8000), 0x11);

    bus.write_byte(0xE000, 0x33);
    for bank in 0..4 {
        bus.select_bank(bank);
        assert_eq!(bus.read_byte(0xE000), 0x33);
    }
}
