use crate::components::{FormattedConfigError, MatmulSetupError};

/// Distribution of one padded axis between the thread teams of that axis.
///
/// Teams are assigned whole blocks with [balance211](crate::components::balance211): the first
/// `blk_num` teams receive `block_size` elements, the others `imbalance_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSplit {
    /// Padded extent of the axis.
    pub extent: usize,
    /// Block size of the axis.
    pub block: usize,
    /// Requested number of teams.
    pub split: usize,
    /// Elements of a regular team.
    pub block_size: usize,
    /// Elements of an imbalanced team, equal to `block_size` when the split is even.
    pub imbalance_size: usize,
    /// Number of teams receiving `block_size` elements.
    pub blk_num: usize,
}

impl AxisSplit {
    pub fn new(extent: usize, block: usize, split: usize) -> Self {
        let blocks = extent / block;
        let split = split.max(1);
        let block_size = blocks.div_ceil(split) * block;
        let imbalance_size = match blocks / split * block {
            0 => block_size,
            size => size,
        };
        let blk_num = (extent - (block_size - block) * split) / block;

        Self {
            extent,
            block,
            split,
            block_size,
            imbalance_size,
            blk_num,
        }
    }

    /// Number of blocks of the axis.
    pub fn blocks(&self) -> usize {
        self.extent / self.block
    }

    /// Number of teams that receive at least one block.
    pub fn real_split(&self) -> usize {
        self.blocks().min(self.split)
    }

    /// Whether some team receives `imbalance_size` elements.
    pub fn has_imbalance(&self) -> bool {
        self.blk_num < self.real_split() && self.imbalance_size != self.block_size
    }

    /// Blocks of a regular team.
    pub fn regular_blocks(&self) -> usize {
        self.block_size / self.block
    }

    /// Blocks of an imbalanced team.
    pub fn imbalance_blocks(&self) -> usize {
        self.imbalance_size / self.block
    }

    /// Blocks of a team of either kind.
    pub fn team_blocks(&self, imbalanced: bool) -> usize {
        match imbalanced {
            true => self.imbalance_blocks(),
            false => self.regular_blocks(),
        }
    }

    /// Whether `sub_blocks` sub-blocks of a team ever differ in size.
    pub fn uneven_sub_blocks(&self, sub_blocks: usize) -> bool {
        let uneven = |blocks: usize| blocks % sub_blocks != 0;

        uneven(self.regular_blocks()) || (self.has_imbalance() && uneven(self.imbalance_blocks()))
    }

    /// Reject a sub-block count larger than the blocks of some team.
    pub fn validate_sub_blocks(
        &self,
        axis: &'static str,
        sub_blocks: usize,
    ) -> Result<(), MatmulSetupError> {
        let regular = self.regular_blocks();
        let imbalance = self.imbalance_blocks();

        if sub_blocks == 0 || regular < sub_blocks || imbalance < sub_blocks {
            return Err(FormattedConfigError::new(move || {
                format!(
                    "{axis} sub-blocks ({sub_blocks}) must be positive and at most the blocks of \
                     every team (regular {regular}, imbalanced {imbalance})"
                )
            })
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::balance211;

    #[test]
    fn uneven_split() {
        // 9 blocks of 16 on 2 teams: 5 then 4 blocks.
        let split = AxisSplit::new(144, 16, 2);

        assert_eq!(split.block_size, 80);
        assert_eq!(split.imbalance_size, 64);
        assert_eq!(split.blk_num, 1);
        assert_eq!(split.real_split(), 2);
        assert!(split.has_imbalance());
    }

    #[test]
    fn even_split_has_no_imbalance() {
        let split = AxisSplit::new(128, 16, 4);

        assert_eq!(split.block_size, 32);
        assert_eq!(split.imbalance_size, 32);
        assert_eq!(split.blk_num, 4);
        assert!(!split.has_imbalance());
    }

    #[test]
    fn more_teams_than_blocks() {
        let split = AxisSplit::new(8, 4, 8);

        assert_eq!(split.block_size, 4);
        assert_eq!(split.imbalance_size, 4);
        assert_eq!(split.real_split(), 2);
        assert!(!split.has_imbalance());
    }

    #[test]
    fn agrees_with_balance211() {
        for blocks in 1..30 {
            for teams in 1..8 {
                let split = AxisSplit::new(blocks * 4, 4, teams);

                for idx in 0..split.real_split() {
                    let region = balance211(blocks, teams, idx);
                    let imbalanced = idx >= split.blk_num;
                    assert_eq!(region.len, split.team_blocks(imbalanced), "{blocks} {teams} {idx}");
                }
            }
        }
    }

    #[test]
    fn too_many_sub_blocks_are_rejected() {
        let split = AxisSplit::new(144, 16, 2);

        assert!(split.validate_sub_blocks("M", 4).is_ok());
        assert!(matches!(
            split.validate_sub_blocks("M", 5),
            Err(MatmulSetupError::InvalidConfig(_))
        ));
        assert!(split.validate_sub_blocks("M", 0).is_err());
    }
}
