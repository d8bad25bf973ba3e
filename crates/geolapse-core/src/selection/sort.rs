use std::cmp::Ordering;

use crate::scene::{SceneDescriptor, SortField, SortOrder};

/// Order scenes by `field`, then by acquisition instant ascending, then by id.
///
/// Scenes without a value for `field` go last regardless of `order`.
pub fn sort_scenes(scenes: &mut [SceneDescriptor], field: SortField, order: SortOrder) {
    scenes.sort_by(|a, b| {
        compare_field(a, b, field, order)
            .then_with(|| a.acquired.cmp(&b.acquired))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn compare_field(a: &SceneDescriptor, b: &SceneDescriptor, field: SortField, order: SortOrder) -> Ordering {
    match field {
        SortField::Acquired => directed(a.acquired.cmp(&b.acquired), order),
        SortField::CloudFraction => compare_f64(a.cloud_fraction, b.cloud_fraction, order),
        SortField::FillFraction => compare_f64(a.fill_fraction, b.fill_fraction, order),
        SortField::ValidFraction => compare_f64(a.valid_fraction, b.valid_fraction, order),
        SortField::SolarAzimuthAngle => {
            compare_f64(a.solar_azimuth_angle, b.solar_azimuth_angle, order)
        }
        SortField::SolarElevationAngle => {
            compare_f64(a.solar_elevation_angle, b.solar_elevation_angle, order)
        }
        SortField::SatId => compare_missing_last(a.sat_id.as_ref(), b.sat_id.as_ref(), order, |x, y| x.cmp(y)),
        SortField::Product => directed(a.product.cmp(&b.product), order),
        SortField::Id => directed(a.id.cmp(&b.id), order),
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn compare_f64(a: Option<f64>, b: Option<f64>, order: SortOrder) -> Ordering {
    compare_missing_last(a.as_ref(), b.as_ref(), order, |x, y| x.total_cmp(y))
}

fn compare_missing_last<T>(
    a: Option<&T>,
    b: Option<&T>,
    order: SortOrder,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => directed(cmp(x, y), order),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
