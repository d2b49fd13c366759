use std::fs;
use std::path::PathBuf;

/// A GPIO controller exposed as a character device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioChip {
    pub number: u32,
    pub path: PathBuf,
}

impl GpioChip {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            path: PathBuf::from(format!("/dev/gpiochip{number}")),
        }
    }
}

/// Enumerates `/dev/gpiochip*` nodes, sorted by chip number.
pub fn discover() -> Vec<GpioChip> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    let mut found: Vec<GpioChip> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let number: u32 = name.strip_prefix("gpiochip")?.parse().ok()?;
            Some(GpioChip {
                number,
                path: entry.path(),
            })
        })
        .collect();
    found.sort_by_key(|c| c.number);
    found
}

/// Applies a priority override to a discovered chip list. Chips named in
/// `priority` and present in `discovered` come first, in override order;
/// every remaining discovered chip follows in its original order. Override
/// entries naming absent chips are ignored, so an override never drops a
/// discovered chip.
pub fn order(discovered: Vec<GpioChip>, priority: &[u32]) -> Vec<GpioChip> {
    if priority.is_empty() {
        return discovered;
    }
    let mut ordered = Vec::with_capacity(discovered.len());
    for number in priority {
        if let Some(chip) = discovered.iter().find(|c| c.number == *number)
            && !ordered.contains(chip)
        {
            ordered.push(chip.clone());
        }
    }
    for chip in discovered {
        if !ordered.contains(&chip) {
            ordered.push(chip);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chips(numbers: &[u32]) -> Vec<GpioChip> {
        numbers.iter().map(|n| GpioChip::new(*n)).collect()
    }

    fn numbers(chips: &[GpioChip]) -> Vec<u32> {
        chips.iter().map(|c| c.number).collect()
    }

    #[test]
    fn override_moves_named_chips_to_front() {
        let ordered = order(chips(&[0, 1, 2, 3]), &[2, 0]);
        assert_eq!(numbers(&ordered), vec![2, 0, 1, 3]);
    }

    #[test]
    fn empty_override_keeps_discovered_order() {
        let ordered = order(chips(&[0, 1, 4]), &[]);
        assert_eq!(numbers(&ordered), vec![0, 1, 4]);
    }

    #[test]
    fn absent_override_entries_are_ignored() {
        let ordered = order(chips(&[0, 1]), &[7, 1, 9]);
        assert_eq!(numbers(&ordered), vec![1, 0]);
    }

    #[test]
    fn duplicate_override_entries_emit_once() {
        let ordered = order(chips(&[0, 1, 2]), &[1, 1, 2]);
        assert_eq!(numbers(&ordered), vec![1, 2, 0]);
    }
}
