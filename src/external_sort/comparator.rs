use std::cmp::Ordering;

use crate::error::Result;
use crate::external_sort::constants::INSERTION_SORT_THRESHOLD;

/// Ordering over encoded lines.
///
/// A comparison may fail; the sorter stops and returns the error instead of
/// falling back to some other order.
pub trait LineComparator {
    fn compare(&self, a: &str, b: &str) -> Result<Ordering>;
}

/// Plain byte-wise order of the line text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextOrder;

impl LineComparator for TextOrder {
    fn compare(&self, a: &str, b: &str) -> Result<Ordering> {
        Ok(a.cmp(b))
    }
}

impl<F> LineComparator for F
where
    F: Fn(&str, &str) -> Result<Ordering>,
{
    fn compare(&self, a: &str, b: &str) -> Result<Ordering> {
        self(a, b)
    }
}

/// Stable sort that stops at the first failed comparison.
///
/// On error `items` is left empty; the caller is expected to abandon the chunk.
pub fn try_sort_by<T, F>(items: &mut Vec<T>, mut compare: F) -> Result<()>
where
    F: FnMut(&T, &T) -> Result<Ordering>,
{
    let owned = std::mem::take(items);
    *items = merge_sort(owned, &mut compare)?;
    Ok(())
}

fn merge_sort<T, F>(mut items: Vec<T>, compare: &mut F) -> Result<Vec<T>>
where
    F: FnMut(&T, &T) -> Result<Ordering>,
{
    if items.len() <= INSERTION_SORT_THRESHOLD {
        insertion_sort(&mut items, compare)?;
        return Ok(items);
    }

    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, compare)?;
    let right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => compare(b, a)? == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }

    Ok(merged)
}

fn insertion_sort<T, F>(items: &mut [T], compare: &mut F) -> Result<()>
where
    F: FnMut(&T, &T) -> Result<Ordering>,
{
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(&items[j], &items[j - 1])? == Ordering::Less {
            items.swap(j, j - 1);
            j -= 1;
        }
    }
    Ok(())
}
