//! Part planning
//!
//! Splits a logical object into contiguous parts under object-store limits.

use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};

/// Size helpers, binary units
pub const fn kib(n: u64) -> u64 {
    n * (1 << 10)
}

pub const fn mib(n: u64) -> u64 {
    n * (1 << 20)
}

pub const fn gib(n: u64) -> u64 {
    n * (1 << 30)
}

pub const fn tib(n: u64) -> u64 {
    n * (1 << 40)
}

/// Object-store constraints applied while planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    /// Upper bound on the number of parts; the part size grows to stay under it
    pub max_parts: u64,
    /// Largest object the store accepts
    pub max_object_size: u64,
    /// Part size used when the caller has no preference
    pub default_part_size: u64,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            max_parts: 100_000_000,
            max_object_size: tib(5),
            default_part_size: kib(150),
        }
    }
}

/// One contiguous byte range of the logical object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// 1-based part number
    pub number: u32,
    /// Byte offset into the logical object
    pub offset: u64,
    /// Byte length, always > 0
    pub size: u64,
}

impl PartDescriptor {
    /// Inclusive last byte offset
    pub fn last_byte(&self) -> u64 {
        self.offset + self.size - 1
    }

    /// HTTP range header value, e.g. `bytes=0-99`
    pub fn byte_range(&self) -> String {
        format!("bytes={}-{}", self.offset, self.last_byte())
    }
}

/// Ordered, contiguous sequence of parts covering an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    total_size: u64,
    part_size: u64,
    parts: Vec<PartDescriptor>,
}

impl PartPlan {
    /// Build a plan from an externally supplied layout.
    ///
    /// Sizes are taken in part-number order; numbers must run 1..=N without
    /// gaps, every size must be positive and the sizes must add up to
    /// `total_size`.
    pub fn from_sizes(total_size: u64, numbered_sizes: &[(u32, u64)]) -> Result<Self> {
        let mut sorted = numbered_sizes.to_vec();
        sorted.sort_by_key(|(number, _)| *number);

        let mut parts = Vec::with_capacity(sorted.len());
        let mut offset = 0u64;
        for (idx, (number, size)) in sorted.into_iter().enumerate() {
            let expected = idx as u32 + 1;
            if number != expected {
                return Err(UploadError::configuration(format!(
                    "part numbers are not contiguous: expected {}, got {}",
                    expected, number
                )));
            }
            if size == 0 {
                return Err(UploadError::configuration(format!("part {} has zero size", number)));
            }
            parts.push(PartDescriptor { number, offset, size });
            offset += size;
        }

        if offset != total_size {
            return Err(UploadError::configuration(format!(
                "part sizes sum to {} but object is {} bytes",
                offset, total_size
            )));
        }

        let part_size = parts.first().map(|p| p.size).unwrap_or(0);
        Ok(Self {
            total_size,
            part_size,
            parts,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Effective size of every part but the last
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[PartDescriptor] {
        &self.parts
    }

    pub fn get(&self, number: u32) -> Option<&PartDescriptor> {
        number
            .checked_sub(1)
            .and_then(|idx| self.parts.get(idx as usize))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartDescriptor> {
        self.parts.iter()
    }

    /// True when both plans describe the same byte ranges
    pub fn same_layout(&self, other: &PartPlan) -> bool {
        self.total_size == other.total_size && self.parts == other.parts
    }
}

impl IntoIterator for PartPlan {
    type Item = PartDescriptor;
    type IntoIter = std::vec::IntoIter<PartDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

/// Plan the parts for an object of `total_size` bytes.
///
/// Every part but the last is exactly the effective part size; the last one
/// holds the remainder. A single-part plan always carries the full size.
pub fn plan_parts(total_size: u64, target_part_size: u64, limits: &PartLimits) -> Result<PartPlan> {
    if total_size == 0 {
        return Ok(PartPlan {
            total_size: 0,
            part_size: 0,
            parts: Vec::new(),
        });
    }

    if target_part_size == 0 {
        return Err(UploadError::configuration("part size must be positive"));
    }
    if limits.max_parts == 0 {
        return Err(UploadError::configuration("part count limit must be positive"));
    }

    if total_size > limits.max_object_size {
        return Err(UploadError::configuration(format!(
            "object of {} bytes is larger than the maximum object size of {} bytes",
            total_size, limits.max_object_size
        )));
    }

    let mut part_size = target_part_size;
    if total_size.div_ceil(part_size) >= limits.max_parts {
        part_size = total_size.div_ceil(limits.max_parts);
    }

    let mut part_count = total_size / part_size;
    let mut final_part_size = total_size % part_size;
    if final_part_size == 0 {
        final_part_size = part_size;
    } else {
        part_count += 1;
    }
    if part_count == 1 {
        part_size = final_part_size;
    }

    let parts = (0..part_count)
        .map(|idx| {
            let offset = idx * part_size;
            let size = if idx + 1 == part_count {
                final_part_size
            } else {
                part_size
            };
            PartDescriptor {
                number: idx as u32 + 1,
                offset,
                size,
            }
        })
        .collect();

    Ok(PartPlan {
        total_size,
        part_size,
        parts,
    })
}
