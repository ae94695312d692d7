//! Elster register table
//!
//! Static metadata (index, name, value kind) of the registers the tool knows
//! about. Declaration order is the scan order.

use std::borrow::Cow;

use crate::value::{DecimalScale, ValueKind};

/// Metadata of one device register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub address: u16,
    pub name: &'static str,
    pub kind: ValueKind,
}

impl RegisterDescriptor {
    pub const fn new(address: u16, name: &'static str, kind: ValueKind) -> Self {
        Self {
            address,
            name,
            kind,
        }
    }
}

const DEC: ValueKind = ValueKind::Decimal(DecimalScale::Tenths);
const CENT: ValueKind = ValueKind::Decimal(DecimalScale::Hundredths);
const MIL: ValueKind = ValueKind::Decimal(DecimalScale::Thousandths);
const LE: ValueKind = ValueKind::Unsigned16Le;

const ELSTER_REGISTERS: &[RegisterDescriptor] = &[
    RegisterDescriptor::new(0x0001, "FEHLERMELDUNG", ValueKind::Raw),
    RegisterDescriptor::new(0x0002, "KESSELSOLLTEMP", DEC),
    RegisterDescriptor::new(0x0003, "SPEICHERSOLLTEMP", DEC),
    RegisterDescriptor::new(0x0004, "VORLAUFSOLLTEMP", DEC),
    RegisterDescriptor::new(0x0005, "RAUMSOLLTEMP_I", DEC),
    RegisterDescriptor::new(0x0006, "RAUMSOLLTEMP_II", DEC),
    RegisterDescriptor::new(0x0007, "RAUMSOLLTEMP_III", DEC),
    RegisterDescriptor::new(0x0008, "RAUMSOLLTEMP_NACHT", DEC),
    RegisterDescriptor::new(0x0009, "UHRZEIT", ValueKind::TimeOfDay),
    RegisterDescriptor::new(0x000A, "DATUM", ValueKind::Date),
    RegisterDescriptor::new(0x000B, "GERAETE_ID", ValueKind::Raw),
    RegisterDescriptor::new(0x000C, "AUSSENTEMP", DEC),
    RegisterDescriptor::new(0x000D, "SAMMLERISTTEMP", DEC),
    RegisterDescriptor::new(0x000E, "SPEICHERISTTEMP", DEC),
    RegisterDescriptor::new(0x000F, "VORLAUFISTTEMP", DEC),
    RegisterDescriptor::new(0x0011, "RAUMISTTEMP", DEC),
    RegisterDescriptor::new(0x0012, "VERSTELLTE_RAUMSOLLTEMP", DEC),
    RegisterDescriptor::new(0x0013, "EINSTELL_SPEICHERSOLLTEMP", DEC),
    RegisterDescriptor::new(0x0016, "RUECKLAUFISTTEMP", DEC),
    RegisterDescriptor::new(0x0019, "BRENNERSTARTS", LE),
    RegisterDescriptor::new(0x001A, "KOLLEKTORTEMP", DEC),
    RegisterDescriptor::new(0x0022, "HEIZKURVE", CENT),
    RegisterDescriptor::new(0x0027, "SPANNUNG_FUEHLER", MIL),
    RegisterDescriptor::new(0x0075, "FEUCHTE", DEC),
    RegisterDescriptor::new(0x00F7, "SOMMERBETRIEB", ValueKind::Bool),
    RegisterDescriptor::new(0x0105, "HEIZKREIS_AKTIV", ValueKind::LittleBool),
    RegisterDescriptor::new(0x010C, "WW_ECO_TEMP", DEC),
    RegisterDescriptor::new(0x0112, "PROGRAMMSCHALTER", ValueKind::Raw),
    RegisterDescriptor::new(0x0121, "WOCHENTAG", ValueKind::Byte),
    RegisterDescriptor::new(0x0122, "TAG", ValueKind::Byte),
    RegisterDescriptor::new(0x0123, "MONAT", ValueKind::Byte),
    RegisterDescriptor::new(0x0124, "JAHR", ValueKind::Byte),
    RegisterDescriptor::new(0x0125, "STUNDE", ValueKind::Byte),
    RegisterDescriptor::new(0x0126, "MINUTE", ValueKind::Byte),
    RegisterDescriptor::new(0x0199, "SOFTWARE_NUMMER", LE),
    RegisterDescriptor::new(0x019A, "SOFTWARE_VERSION", LE),
    RegisterDescriptor::new(0x0930, "WAERMEERTRAG_KWH", LE),
    RegisterDescriptor::new(0x0931, "WAERMEERTRAG_MWH", LE),
    RegisterDescriptor::new(0x1410, "HEIZPROG_1_MO", ValueKind::ScheduleWindow),
    RegisterDescriptor::new(0x1420, "HEIZPROG_1_DI", ValueKind::ScheduleWindow),
    RegisterDescriptor::new(0x1430, "HEIZPROG_1_MI", ValueKind::ScheduleWindow),
    RegisterDescriptor::new(0x1440, "HEIZPROG_1_DO", ValueKind::ScheduleWindow),
    RegisterDescriptor::new(0x1450, "HEIZPROG_1_FR", ValueKind::ScheduleWindow),
    RegisterDescriptor::new(0x1460, "HEIZPROG_1_SA", ValueKind::ScheduleWindow),
    RegisterDescriptor::new(0x1470, "HEIZPROG_1_SO", ValueKind::ScheduleWindow),
];

/// Ordered, read-only register lookup table
#[derive(Debug, Clone)]
pub struct RegisterTable {
    entries: Cow<'static, [RegisterDescriptor]>,
}

impl RegisterTable {
    pub fn new(entries: Vec<RegisterDescriptor>) -> Self {
        Self {
            entries: Cow::Owned(entries),
        }
    }

    /// Built-in Elster register table
    pub fn elster() -> Self {
        Self {
            entries: Cow::Borrowed(ELSTER_REGISTERS),
        }
    }

    /// Find a register by index
    ///
    /// Linear scan; the table holds a few dozen entries.
    pub fn lookup(&self, address: u16) -> Option<&RegisterDescriptor> {
        self.entries.iter().find(|r| r.address == address)
    }

    /// Registers in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::elster()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup() {
        let table = RegisterTable::elster();
        let reg = table.lookup(0x000C).map(|r| r.name);
        assert_eq!(reg, Some("AUSSENTEMP"));
        assert_eq!(
            table.lookup(0x010C).map(|r| r.kind),
            Some(ValueKind::Decimal(DecimalScale::Tenths))
        );
        assert!(table.lookup(0xFFFF).is_none());
    }

    #[test]
    fn test_addresses_unique() {
        let table = RegisterTable::elster();
        let unique: HashSet<u16> = table.iter().map(|r| r.address).collect();
        assert_eq!(unique.len(), table.len());
    }

    #[test]
    fn test_custom_table_keeps_order() {
        let table = RegisterTable::new(vec![
            RegisterDescriptor::new(0x0200, "B", ValueKind::Byte),
            RegisterDescriptor::new(0x0001, "A", ValueKind::Byte),
        ]);
        let order: Vec<u16> = table.iter().map(|r| r.address).collect();
        assert_eq!(order, vec![0x0200, 0x0001]);
        assert!(RegisterTable::new(Vec::new()).is_empty());
    }
}
