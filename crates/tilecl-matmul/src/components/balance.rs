use tilecl_ir::Expr;

/// Contiguous range of work items assigned to one member of a team.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkRegion {
    /// First item.
    pub start: usize,
    /// Number of items.
    pub len: usize,
}

/// Split `n` items between `team` members as evenly as possible.
///
/// The first `T1 = n - (ceil(n / team) - 1) * team` members receive `ceil(n / team)` items, the
/// others one less. Regions are contiguous, ordered by member index, and cover `0..n` exactly once
/// when `team <= n`. Members past the last item get an empty region.
pub fn balance211(n: usize, team: usize, idx: usize) -> WorkRegion {
    let team = team.max(1);
    if n == 0 {
        return WorkRegion::new(0, 0);
    }

    let n1 = n.div_ceil(team);
    let n2 = n1 - 1;
    let t1 = n - n2 * team;

    let start = match idx <= t1 {
        true => idx * n1,
        false => t1 * n1 + (idx - t1) * n2,
    };
    let len = match idx < t1 {
        true => n1,
        false => n2,
    };

    // A team larger than `n` makes `n2` zero, keep the start in range for the trailing members.
    WorkRegion::new(start.min(n), len)
}

/// Number of members of the team receiving the larger share, `T1` in [balance211].
pub fn balance211_bigger(n: usize, team: usize) -> usize {
    let team = team.max(1);
    if n == 0 {
        return 0;
    }
    n - (n.div_ceil(team) - 1) * team
}

/// Symbolic [balance211], for item counts only known at run time.
///
/// Returns the start and length expressions of the region of member `idx`, which must be below
/// `team`.
pub fn balance211_expr(n: &Expr, team: usize, idx: &Expr) -> (Expr, Expr) {
    let team = team.max(1);
    if team == 1 {
        return (Expr::from(0), n.clone());
    }

    if let (Some(n), Some(idx)) = (n.as_const(), idx.as_const()) {
        let region = balance211(n.max(0) as usize, team, idx.max(0) as usize);
        return (Expr::from(region.start), Expr::from(region.len));
    }

    let n1 = n.div_ceil(team);
    let n2 = &n1 - 1;
    let t1 = n - &n2 * team;

    let start = Expr::select(
        idx.le(&t1),
        idx * &n1,
        &t1 * &n1 + (idx - &t1) * &n2,
    );
    let len = Expr::select(idx.lt(&t1), n1, n2);

    (start, len)
}

/// Symbolic [balance211_bigger].
pub fn balance211_bigger_expr(n: &Expr, team: usize) -> Expr {
    let team = team.max(1);
    n - (n.div_ceil(team) - 1) * team
}
