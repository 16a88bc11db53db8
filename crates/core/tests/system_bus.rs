// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use labwired_emucore::peripherals::memory::MappedMemory;
use labwired_emucore::{
    AccessHandlers, AccessWidths, AddressRange, BusError, Peripheral, Registration, SystemBus,
    Width,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Returns its tag in the upper half and the accessed offset in the lower.
#[derive(Debug)]
struct Tagged {
    tag: u32,
    last_offset: AtomicU64,
}

impl Tagged {
    fn new(tag: u32) -> Arc<Self> {
        Arc::new(Self {
            tag,
            last_offset: AtomicU64::new(u64::MAX),
        })
    }
}

impl Peripheral for Tagged {
    fn widths(&self) -> AccessWidths {
        AccessWidths::DOUBLE_WORD
    }

    fn read_u32(&self, offset: u64) -> u32 {
        self.last_offset.store(offset, Ordering::SeqCst);
        (self.tag << 16) | (offset as u32 & 0xFFFF)
    }

    fn write_u32(&self, offset: u64, _value: u32) {
        self.last_offset.store(offset, Ordering::SeqCst);
    }

    fn region_handlers(self: Arc<Self>, region: &str) -> Option<AccessHandlers> {
        let tag: u64 = match region {
            "config" => 0xC0,
            "fifo" => 0xF1,
            _ => return None,
        };
        Some(AccessHandlers::new().with_read(Width::DoubleWord, move |offset| {
            (tag << 16) | (offset & 0xFFFF)
        }))
    }
}

fn memory(size: usize) -> Arc<dyn Peripheral> {
    Arc::new(MappedMemory::new(size))
}

#[test]
fn test_unmapped_read_returns_zero() {
    let bus = SystemBus::new();
    assert_eq!(bus.read_u8(0x1000), 0);
    assert_eq!(bus.read_u64(0xFFFF_0000), 0);
    bus.write_u32(0x1000, 0xDEAD_BEEF);
    assert_eq!(bus.read_u32(0x1000), 0);
    assert_eq!(bus.read_bytes(0, 8), vec![0; 8]);
}

#[test]
fn test_routes_to_owner_with_translated_offset() {
    let bus = SystemBus::new();
    let dev = Tagged::new(0xAB);
    bus.register("dev", dev.clone(), Registration::by(0x4000_0000, 0x100).unwrap())
        .unwrap();

    assert_eq!(bus.read_u32(0x4000_0010), 0x00AB_0010);
    assert_eq!(dev.last_offset.load(Ordering::SeqCst), 0x10);

    bus.write_u32(0x4000_0020, 1);
    assert_eq!(dev.last_offset.load(Ordering::SeqCst), 0x20);
}

#[test]
fn test_registration_offset_shifts_peripheral_view() {
    let bus = SystemBus::new();
    let dev = Tagged::new(1);
    bus.register(
        "dev",
        dev.clone(),
        Registration::by(0x1000, 0x100).unwrap().with_offset(0x800),
    )
    .unwrap();

    assert_eq!(bus.read_u32(0x1004), 0x0001_0804);
    assert_eq!(bus.find(0x1004).map(|r| r.offset), Some(0x804));
}

#[test]
fn test_many_registrations() {
    let bus = SystemBus::new();
    for i in 0..64u64 {
        bus.register(
            &format!("ram{}", i),
            memory(0x100),
            Registration::by(i * 0x1000, 0x100).unwrap(),
        )
        .unwrap();
    }
    for i in 0..64u64 {
        bus.write_u32(i * 0x1000 + 0x40, i as u32 * 3);
    }
    for i in 0..64u64 {
        assert_eq!(bus.read_u32(i * 0x1000 + 0x40), i as u32 * 3);
        assert!(!bus.is_mapped(i * 0x1000 + 0x100));
    }
    assert_eq!(bus.registrations().len(), 64);
}

#[test]
fn test_multi_region_routing() {
    let bus = SystemBus::new();
    let dev = Tagged::new(0x77);
    let p: Arc<dyn Peripheral> = dev.clone();

    bus.register(
        "dev.config",
        p.clone(),
        Registration::region(AddressRange::new(0, 100).unwrap(), "config"),
    )
    .unwrap();
    bus.register(
        "dev.fifo",
        p.clone(),
        Registration::region(AddressRange::new(100, 200).unwrap(), "fifo"),
    )
    .unwrap();
    bus.register("dev", p, Registration::range(AddressRange::new(200, 400).unwrap()))
        .unwrap();

    assert_eq!(bus.read_u32(10), 0x00C0_000A);
    assert_eq!(bus.read_u32(110), 0x00F1_000A);
    assert_eq!(bus.read_u32(210), 0x0077_000A);
    assert_eq!(bus.find(150).and_then(|r| r.region), Some("fifo".to_string()));
    // Only the plain window reaches the peripheral itself.
    assert_eq!(dev.last_offset.load(Ordering::SeqCst), 10);
}

#[test]
fn test_unknown_region_rejected() {
    let bus = SystemBus::new();
    let err = bus
        .register(
            "dev",
            Tagged::new(0),
            Registration::region(AddressRange::new(0, 0x10).unwrap(), "dma"),
        )
        .unwrap_err();
    assert_eq!(err, BusError::UnknownRegion("dma".to_string()));
    assert!(bus.registrations().is_empty());
}

#[test]
fn test_overlap_and_duplicate_rejected() {
    let bus = SystemBus::new();
    bus.register("a", memory(0x100), Registration::by(0x100, 0x100).unwrap())
        .unwrap();

    let err = bus
        .register("b", memory(0x100), Registration::by(0x180, 0x100).unwrap())
        .unwrap_err();
    assert!(matches!(err, BusError::Overlap { .. }));

    let err = bus
        .register("c", memory(0x100), Registration::by(0x100, 0x100).unwrap())
        .unwrap_err();
    assert_eq!(
        err,
        BusError::DuplicateRegistration(AddressRange::new(0x100, 0x200).unwrap())
    );

    // Adjacent windows are fine.
    bus.register("d", memory(0x100), Registration::by(0x200, 0x100).unwrap())
        .unwrap();
}

#[test]
fn test_point_registration_requires_size() {
    let bus = SystemBus::new();
    let err = bus
        .register("dev", Tagged::new(0), Registration::point(0x2000))
        .unwrap_err();
    assert_eq!(err, BusError::UnknownSize(0x2000));

    bus.register("ram", memory(0x40), Registration::point(0x2000))
        .unwrap();
    assert!(bus.is_mapped(0x203F));
    assert!(!bus.is_mapped(0x2040));
}

#[test]
fn test_empty_and_self_overlapping_range_sets() {
    let bus = SystemBus::new();
    assert_eq!(
        bus.register("ram", memory(0x10), Registration::range_set(Vec::new()))
            .unwrap_err(),
        BusError::EmptyRegistration
    );

    let ranges = vec![
        AddressRange::by(0, 0x10).unwrap(),
        AddressRange::by(0x8, 0x10).unwrap(),
    ];
    let err = bus
        .register("ram", memory(0x10), Registration::range_set(ranges))
        .unwrap_err();
    assert!(matches!(err, BusError::Overlap { .. }));
}

#[test]
fn test_bulk_access_through_range_set() {
    let bus = SystemBus::new();
    let ranges = vec![
        AddressRange::by(0, 16).unwrap(),
        AddressRange::by(0xC000_0000, 16).unwrap(),
    ];
    bus.register("ram", memory(16), Registration::range_set(ranges))
        .unwrap();

    let data: Vec<u8> = (1..=16).collect();
    bus.write_bytes(0, &data);
    assert_eq!(bus.read_bytes(0xC000_0000, 16), data);

    // Second half falls into the gap after the first window.
    let mut expected = data[8..].to_vec();
    expected.extend_from_slice(&[0; 8]);
    assert_eq!(bus.read_bytes(8, 16), expected);
}

#[test]
fn test_read_bytes_across_segments() {
    let bus = SystemBus::new();
    bus.register("low", memory(100), Registration::by(50, 100).unwrap())
        .unwrap();
    bus.register("high", memory(100), Registration::by(200, 100).unwrap())
        .unwrap();

    bus.write_bytes(0, &[0xAA; 350]);
    let bytes = bus.read_bytes(0, 350);

    assert_eq!(bytes.len(), 350);
    assert!(bytes[..50].iter().all(|b| *b == 0));
    assert!(bytes[50..150].iter().all(|b| *b == 0xAA));
    assert!(bytes[150..200].iter().all(|b| *b == 0));
    assert!(bytes[200..300].iter().all(|b| *b == 0xAA));
    assert!(bytes[300..].iter().all(|b| *b == 0));
}

#[test]
fn test_width_synthesis() {
    let bus = SystemBus::new();
    let dev = Tagged::new(0x1234);
    bus.register("dev", dev, Registration::by(0x100, 0x10).unwrap())
        .unwrap();

    // Byte reads are extracted from the 32-bit register at offset 0.
    assert_eq!(bus.read_u8(0x100), 0x00);
    assert_eq!(bus.read_u8(0x102), 0x34);
    assert_eq!(bus.read_u8(0x103), 0x12);
    // 64-bit reads are composed from two 32-bit reads.
    assert_eq!(bus.read_u64(0x100), 0x1234_0004_1234_0000);
}

#[test]
fn test_no_stale_mapping_after_unregister() {
    let bus = SystemBus::new();
    bus.register("old", memory(0x100), Registration::by(0x1000, 0x100).unwrap())
        .unwrap();
    bus.write_u32(0x1000, 0x1111_1111);

    bus.unregister_at(0x1080).unwrap();
    assert!(!bus.is_mapped(0x1000));
    assert_eq!(bus.read_u32(0x1000), 0);
    assert_eq!(bus.unregister_at(0x1000), Err(BusError::NotRegistered(0x1000)));

    bus.register("new", memory(0x100), Registration::by(0x1000, 0x100).unwrap())
        .unwrap();
    assert_eq!(bus.read_u32(0x1000), 0);
    assert_eq!(bus.find(0x1000).map(|r| r.name), Some("new".to_string()));
}

#[test]
fn test_unregister_removes_sibling_windows() {
    let bus = SystemBus::new();
    let ram = memory(0x10);
    let ranges = vec![
        AddressRange::by(0, 0x10).unwrap(),
        AddressRange::by(0x100, 0x10).unwrap(),
    ];
    bus.register("ram", ram.clone(), Registration::range_set(ranges))
        .unwrap();
    bus.register("ram.hi", ram.clone(), Registration::by(0x200, 0x10).unwrap())
        .unwrap();

    bus.unregister_at(0x100).unwrap();
    assert!(!bus.is_mapped(0));
    assert!(bus.is_mapped(0x200));

    assert_eq!(bus.unregister_peripheral(&ram), Ok(1));
    assert_eq!(
        bus.unregister_peripheral(&ram),
        Err(BusError::PeripheralNotRegistered)
    );
}

#[test]
fn test_overlay_precedence() {
    let bus = SystemBus::new();
    bus.register("base", memory(0x1000), Registration::by(0, 0x1000).unwrap())
        .unwrap();
    bus.register_overlay("narrow", memory(0x100), Registration::by(0x100, 0x100).unwrap())
        .unwrap();
    bus.register_overlay("wide", memory(0x2000), Registration::by(0, 0x2000).unwrap())
        .unwrap();

    let owner = |addr| bus.find(addr).map(|r| r.name);
    assert_eq!(owner(0x150), Some("narrow".to_string()));
    assert_eq!(owner(0x50), Some("base".to_string()));
    assert_eq!(owner(0x1800), Some("wide".to_string()));

    // Same length: the newer overlay wins where they intersect.
    bus.register_overlay("late", memory(0x100), Registration::by(0x180, 0x100).unwrap())
        .unwrap();
    assert_eq!(owner(0x17F), Some("narrow".to_string()));
    assert_eq!(owner(0x180), Some("late".to_string()));
    assert_eq!(owner(0x27F), Some("late".to_string()));

    let err = bus
        .register_overlay("again", memory(0x100), Registration::by(0x100, 0x100).unwrap())
        .unwrap_err();
    assert!(matches!(err, BusError::DuplicateRegistration(_)));

    // Removing the overlay uncovers what was underneath.
    bus.unregister_at(0x150).unwrap();
    assert_eq!(owner(0x150), Some("base".to_string()));
}

/// Copies a word from `source` to `destination` on every write, through the
/// bus it is mapped on, and maps a scratch memory the first time.
#[derive(Debug)]
struct Forwarder {
    bus: Weak<SystemBus>,
    source: u64,
    destination: u64,
}

impl Peripheral for Forwarder {
    fn widths(&self) -> AccessWidths {
        AccessWidths::DOUBLE_WORD
    }

    fn write_u32(&self, _offset: u64, _value: u32) {
        if let Some(bus) = self.bus.upgrade() {
            if !bus.is_mapped(0x9000) {
                bus.register("scratch", memory(0x10), Registration::by(0x9000, 0x10).unwrap())
                    .unwrap();
            }
            let value = bus.read_u32(self.source);
            bus.write_u32(self.destination, value);
            bus.write_u32(0x9000, value);
        }
    }
}

#[test]
fn test_reentrant_peripheral_does_not_deadlock() {
    let bus = Arc::new(SystemBus::new());
    bus.register("ram", memory(0x100), Registration::by(0x1000, 0x100).unwrap())
        .unwrap();
    let forwarder = Arc::new(Forwarder {
        bus: Arc::downgrade(&bus),
        source: 0x1000,
        destination: 0x1010,
    });
    bus.register("fwd", forwarder, Registration::by(0x2000, 4).unwrap())
        .unwrap();

    bus.write_u32(0x1000, 0x5555_AAAA);
    bus.write_u32(0x2000, 0);

    assert_eq!(bus.read_u32(0x1010), 0x5555_AAAA);
    assert_eq!(bus.read_u32(0x9000), 0x5555_AAAA);
}

#[test]
fn test_concurrent_access_during_registration() {
    let bus = Arc::new(SystemBus::new());
    bus.register("ram", memory(0x100), Registration::by(0, 0x100).unwrap())
        .unwrap();
    bus.write_u32(0x10, 42);

    let reader = {
        let bus = bus.clone();
        std::thread::spawn(move || {
            for _ in 0..1000 {
                assert_eq!(bus.read_u32(0x10), 42);
            }
        })
    };
    for i in 1..50u64 {
        bus.register(
            &format!("dev{}", i),
            memory(0x10),
            Registration::by(i * 0x1000, 0x10).unwrap(),
        )
        .unwrap();
    }
    reader.join().unwrap();
    assert_eq!(bus.peripherals().len(), 50);
}

#[test]
fn test_reset_reaches_every_peripheral_once() {
    let bus = SystemBus::new();
    let ram = memory(0x10);
    let ranges = vec![AddressRange::by(0, 0x10).unwrap(), AddressRange::by(0x100, 0x10).unwrap()];
    bus.register("ram", ram, Registration::range_set(ranges)).unwrap();
    bus.write_u32(0, 7);

    bus.reset();
    assert_eq!(bus.read_u32(0x100), 0);
    assert_eq!(bus.peripherals().len(), 1);
}

/// Counts byte / doubleword reads and writes per region and for the
/// default handler table.
#[derive(Debug, Default)]
struct RegionCounters {
    // [byte read, byte write, dword read, dword write]
    config: [AtomicU64; 4],
    fifo: [AtomicU64; 4],
    plain: [AtomicU64; 4],
}

impl RegionCounters {
    fn get(counters: &[AtomicU64; 4]) -> [u64; 4] {
        [0, 1, 2, 3].map(|i| counters[i].load(Ordering::SeqCst))
    }

    fn bump(&self, slot: usize) {
        self.plain[slot].fetch_add(1, Ordering::SeqCst);
    }
}

impl Peripheral for RegionCounters {
    fn widths(&self) -> AccessWidths {
        AccessWidths::BYTE | AccessWidths::DOUBLE_WORD
    }

    fn read_u8(&self, _offset: u64) -> u8 {
        self.bump(0);
        0
    }

    fn write_u8(&self, _offset: u64, _value: u8) {
        self.bump(1);
    }

    fn read_u32(&self, _offset: u64) -> u32 {
        self.bump(2);
        0
    }

    fn write_u32(&self, _offset: u64, _value: u32) {
        self.bump(3);
    }

    fn region_handlers(self: Arc<Self>, region: &str) -> Option<AccessHandlers> {
        if region != "config" && region != "fifo" {
            return None;
        }
        let counter = |slot: usize| {
            let me = self.clone();
            let fifo = region == "fifo";
            move || {
                let counters = if fifo { &me.fifo } else { &me.config };
                counters[slot].fetch_add(1, Ordering::SeqCst);
            }
        };
        let (br, bw, dr, dw) = (counter(0), counter(1), counter(2), counter(3));
        Some(
            AccessHandlers::new()
                .with_read(Width::Byte, move |_| {
                    br();
                    0
                })
                .with_write(Width::Byte, move |_, _| bw())
                .with_read(Width::DoubleWord, move |_| {
                    dr();
                    0
                })
                .with_write(Width::DoubleWord, move |_, _| dw()),
        )
    }
}

#[test]
fn test_multi_region_call_counters() {
    let bus = SystemBus::new();
    let dev = Arc::new(RegionCounters::default());
    let p: Arc<dyn Peripheral> = dev.clone();
    bus.register("dev", p.clone(), Registration::by(300, 100).unwrap())
        .unwrap();
    bus.register(
        "dev.config",
        p.clone(),
        Registration::region(AddressRange::new(0x1000, 0x1100).unwrap(), "config"),
    )
    .unwrap();
    bus.register(
        "dev.fifo",
        p,
        Registration::region(AddressRange::new(0x2000, 0x2010).unwrap(), "fifo"),
    )
    .unwrap();

    bus.read_u8(0x1000);
    bus.write_u8(0x1001, 1);
    bus.write_u8(0x1002, 1);
    bus.read_u32(0x1004);
    bus.write_u32(0x1008, 1);
    bus.read_u32(0x2000);
    bus.read_u32(0x2004);
    bus.write_u32(0x2008, 1);
    bus.read_u8(0x200C);
    bus.read_u8(300);
    bus.read_u8(399);
    bus.write_u8(350, 1);
    bus.read_u32(304);
    bus.write_u32(308, 1);
    bus.write_u32(396, 1);
    bus.write_u32(312, 1);

    assert_eq!(RegionCounters::get(&dev.config), [1, 2, 1, 1]);
    assert_eq!(RegionCounters::get(&dev.fifo), [1, 0, 2, 1]);
    assert_eq!(RegionCounters::get(&dev.plain), [2, 1, 1, 3]);

    // Leaving the regions behind only moves the default counters.
    bus.read_u32(0x3000);
    bus.write_u8(400, 1);
    assert_eq!(RegionCounters::get(&dev.plain), [2, 1, 1, 3]);
    bus.read_u32(320);
    assert_eq!(RegionCounters::get(&dev.config), [1, 2, 1, 1]);
    assert_eq!(RegionCounters::get(&dev.fifo), [1, 0, 2, 1]);
    assert_eq!(RegionCounters::get(&dev.plain), [2, 1, 2, 3]);
}

#[test]
fn test_bulk_edges_around_one_window() {
    let bus = SystemBus::new();
    bus.register("ram", memory(100), Registration::by(100, 100).unwrap())
        .unwrap();
    let pattern: Vec<u8> = (0..100u8).collect();
    bus.write_bytes(100, &pattern);

    // Fully contained.
    assert_eq!(bus.read_bytes(120, 20), pattern[20..40].to_vec());

    // Trailing edge straddles the end of the window.
    let mut expected = pattern[80..].to_vec();
    expected.extend_from_slice(&[0; 20]);
    assert_eq!(bus.read_bytes(180, 40), expected);

    // Leading edge straddles the start of the window.
    let mut expected = vec![0; 20];
    expected.extend_from_slice(&pattern[..20]);
    assert_eq!(bus.read_bytes(80, 40), expected);

    // Fully overlapping, with gaps on both sides.
    let mut expected = vec![0; 50];
    expected.extend_from_slice(&pattern);
    expected.extend_from_slice(&[0; 50]);
    assert_eq!(bus.read_bytes(50, 200), expected);

    // Misaligned write straddling the leading edge only touches the window.
    bus.write_bytes(97, &[0xEE; 6]);
    assert_eq!(bus.read_bytes(97, 6), vec![0, 0, 0, 0xEE, 0xEE, 0xEE]);
    assert_eq!(bus.read_u8(103), pattern[3]);
}
