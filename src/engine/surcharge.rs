use crate::limits::{DEFAULT_CHILD_MAX_AGE, DEFAULT_CHILD_MIN_AGE};
use crate::model::*;

/// Extra charges for one stay, independent of the nightly price.
///
/// Only active rules flagged for `track` count. Quantities:
/// - `adult` / `extra_bed`: adults above `base_occupancy × num_rooms`
/// - `child`: children whose age falls in the rule's range (default 0–17)
/// - `breakfast`: every guest, when the rule is mandatory or the track is combo
/// - `other`: whatever the caller asked for
///
/// Percent rules are reported in `deferred` and never priced.
pub fn calculate_surcharges(
    room: &Room,
    rules: &[SurchargeRule],
    nights: u32,
    occupancy: &OccupancyRequest,
    num_rooms: u32,
    track: PriceTrack,
) -> SurchargeBreakdown {
    let mut breakdown = SurchargeBreakdown::default();

    for rule in rules {
        if !rule.active || !rule.applies_to(track) {
            continue;
        }
        let Some(quantity) = quantity_for(rule, room, occupancy, num_rooms, track) else {
            continue;
        };
        if quantity == 0 {
            continue;
        }
        if rule.amount_type == AmountType::Percent {
            breakdown.deferred.push(rule.id);
            continue;
        }

        let mut amount = rule.amount.saturating_mul(Money::from(quantity));
        if rule.is_per_night {
            amount = amount.saturating_mul(Money::from(nights));
        }
        breakdown.total = breakdown.total.saturating_add(amount);
        breakdown.lines.push(SurchargeLine {
            rule_id: rule.id,
            kind: rule.kind,
            label: label_for(rule),
            quantity,
            unit_amount: rule.amount,
            per_night: rule.is_per_night,
            amount,
        });
    }

    breakdown
}

/// `None` means the rule does not apply to this stay at all.
fn quantity_for(
    rule: &SurchargeRule,
    room: &Room,
    occupancy: &OccupancyRequest,
    num_rooms: u32,
    track: PriceTrack,
) -> Option<u32> {
    match rule.kind {
        SurchargeKind::Adult | SurchargeKind::ExtraBed => {
            let included = room.base_occupancy.saturating_mul(num_rooms);
            Some(occupancy.adults.saturating_sub(included))
        }
        SurchargeKind::Child => {
            let (min, max) = age_bounds(rule);
            let matched = occupancy
                .children_ages
                .iter()
                .filter(|age| (min..=max).contains(*age))
                .count();
            Some(u32::try_from(matched).unwrap_or(u32::MAX))
        }
        SurchargeKind::Breakfast => {
            if rule.is_mandatory || track == PriceTrack::Combo {
                let children = u32::try_from(occupancy.children_ages.len()).unwrap_or(u32::MAX);
                Some(occupancy.adults.saturating_add(children))
            } else {
                None
            }
        }
        SurchargeKind::Other => Some(occupancy.other_quantity),
    }
}

fn age_bounds(rule: &SurchargeRule) -> (u32, u32) {
    (
        rule.min_age.unwrap_or(DEFAULT_CHILD_MIN_AGE),
        rule.max_age.unwrap_or(DEFAULT_CHILD_MAX_AGE),
    )
}

fn label_for(rule: &SurchargeRule) -> String {
    let base = match &rule.label {
        Some(label) if !label.trim().is_empty() => label.clone(),
        _ => rule.kind.default_label().to_string(),
    };
    if rule.kind == SurchargeKind::Child {
        let (min, max) = age_bounds(rule);
        format!("{base} ({min}-{max} years)")
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn room() -> Room {
        Room {
            id: Ulid::new(),
            name: Some("Deluxe Ocean View".into()),
            base_price: 800_000,
            base_occupancy: 2,
            max_adults: 3,
            max_children: 2,
            total_rooms: 5,
            status: RoomStatus::Active,
        }
    }

    fn rule(kind: SurchargeKind, amount: Money) -> SurchargeRule {
        SurchargeRule {
            id: Ulid::new(),
            kind,
            min_age: None,
            max_age: None,
            amount,
            amount_type: AmountType::Fixed,
            is_per_night: false,
            is_mandatory: false,
            applies_to_room: true,
            applies_to_combo: true,
            active: true,
            label: None,
        }
    }

    fn occupancy(adults: u32, children_ages: &[u32]) -> OccupancyRequest {
        OccupancyRequest {
            adults,
            children_ages: children_ages.to_vec(),
            other_quantity: 0,
        }
    }

    #[test]
    fn child_in_age_band_per_night() {
        let mut child = rule(SurchargeKind::Child, 100_000);
        child.min_age = Some(6);
        child.max_age = Some(11);
        child.is_per_night = true;

        let b = calculate_surcharges(&room(), &[child], 3, &occupancy(2, &[8]), 1, PriceTrack::Room);
        assert_eq!(b.lines.len(), 1);
        assert_eq!(b.lines[0].quantity, 1);
        assert_eq!(b.lines[0].amount, 300_000);
        assert_eq!(b.lines[0].label, "Child (6-11 years)");
        assert_eq!(b.total, 300_000);
    }

    #[test]
    fn child_bounds_default_to_0_17() {
        let child = rule(SurchargeKind::Child, 50_000);
        let b = calculate_surcharges(&room(), &[child], 2, &occupancy(2, &[0, 17, 18]), 1, PriceTrack::Room);
        assert_eq!(b.lines[0].quantity, 2);
        assert_eq!(b.lines[0].label, "Child (0-17 years)");
    }

    #[test]
    fn extra_adults_above_base_occupancy_per_room() {
        let adult = rule(SurchargeKind::Adult, 200_000);
        let b = calculate_surcharges(&room(), &[adult.clone()], 2, &occupancy(3, &[]), 1, PriceTrack::Room);
        assert_eq!(b.total, 200_000);

        // Two rooms include four adults.
        let b = calculate_surcharges(&room(), &[adult], 2, &occupancy(3, &[]), 2, PriceTrack::Room);
        assert!(b.lines.is_empty());
        assert_eq!(b.total, 0);
    }

    #[test]
    fn breakfast_only_when_mandatory_or_combo() {
        let mut breakfast = rule(SurchargeKind::Breakfast, 120_000);
        breakfast.is_per_night = true;
        let occ = occupancy(2, &[5]);

        let b = calculate_surcharges(&room(), &[breakfast.clone()], 2, &occ, 1, PriceTrack::Room);
        assert!(b.lines.is_empty());

        let b = calculate_surcharges(&room(), &[breakfast.clone()], 2, &occ, 1, PriceTrack::Combo);
        assert_eq!(b.lines[0].quantity, 3);
        assert_eq!(b.total, 720_000);

        breakfast.is_mandatory = true;
        let b = calculate_surcharges(&room(), &[breakfast], 2, &occ, 1, PriceTrack::Room);
        assert_eq!(b.total, 720_000);
    }

    #[test]
    fn track_flags_and_inactive_rules_are_respected() {
        let mut room_only = rule(SurchargeKind::ExtraBed, 300_000);
        room_only.applies_to_combo = false;
        let mut inactive = rule(SurchargeKind::Adult, 999);
        inactive.active = false;

        let occ = occupancy(3, &[]);
        let rules = [room_only, inactive];
        let b = calculate_surcharges(&room(), &rules, 1, &occ, 1, PriceTrack::Combo);
        assert!(b.lines.is_empty());
        let b = calculate_surcharges(&room(), &rules, 1, &occ, 1, PriceTrack::Room);
        assert_eq!(b.lines.len(), 1);
        assert_eq!(b.lines[0].kind, SurchargeKind::ExtraBed);
    }

    #[test]
    fn other_quantity_comes_from_caller() {
        let mut other = rule(SurchargeKind::Other, 75_000);
        other.label = Some("Airport pickup".into());
        let mut occ = occupancy(2, &[]);
        occ.other_quantity = 2;
        let b = calculate_surcharges(&room(), &[other], 4, &occ, 1, PriceTrack::Room);
        assert_eq!(b.lines[0].label, "Airport pickup");
        assert_eq!(b.total, 150_000);
    }

    #[test]
    fn percent_rules_are_deferred_not_priced() {
        let mut pct = rule(SurchargeKind::Adult, 10);
        pct.amount_type = AmountType::Percent;
        let id = pct.id;
        let b = calculate_surcharges(&room(), &[pct], 2, &occupancy(4, &[]), 1, PriceTrack::Room);
        assert_eq!(b.total, 0);
        assert!(b.lines.is_empty());
        assert_eq!(b.deferred, vec![id]);
    }
}
