use crate::ledger::RoundTrip;
use serde::Serialize;

/// Performance summary over closed round trips
#[derive(Debug, Clone, Serialize)]
pub struct BacktestMetrics {
    pub total_pnl: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Gross wins / gross losses
    pub profit_factor: f64,

    /// Largest peak-to-trough drop of cumulative pnl
    pub max_drawdown: f64,

    pub avg_holding_period_minutes: f64,
    pub long_trades: usize,
    pub short_trades: usize,

    pub trades: Vec<RoundTrip>,
}

impl BacktestMetrics {
    pub fn from_round_trips(trips: &[RoundTrip]) -> Self {
        let total_trades = trips.len();
        let total_pnl: f64 = trips.iter().map(|t| t.pnl).sum();

        let wins: Vec<f64> = trips.iter().map(|t| t.pnl).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trips.iter().map(|t| t.pnl).filter(|p| *p <= 0.0).collect();

        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|p| p.abs()).sum();

        let win_rate = if total_trades > 0 {
            wins.len() as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            gross_win / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            gross_loss / losses.len() as f64
        };

        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_holding_period_minutes = if total_trades > 0 {
            trips
                .iter()
                .map(|t| (t.closed_at - t.opened_at).num_minutes() as f64)
                .sum::<f64>()
                / total_trades as f64
        } else {
            0.0
        };

        let long_trades = trips
            .iter()
            .filter(|t| t.direction == crate::models::Direction::Long)
            .count();

        Self {
            total_pnl,
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            avg_win,
            avg_loss,
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor,
            max_drawdown: Self::calculate_drawdown(trips),
            avg_holding_period_minutes,
            long_trades,
            short_trades: total_trades - long_trades,
            trades: trips.to_vec(),
        }
    }

    fn calculate_drawdown(trips: &[RoundTrip]) -> f64 {
        let mut equity = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_dd = 0.0_f64;

        for trip in trips {
            equity += trip.pnl;
            peak = peak.max(equity);
            max_dd = max_dd.max(peak - equity);
        }

        max_dd
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n=== BACKTEST REPORT ===\n");

        println!("P&L");
        println!("  Realized P&L:          {:.2}", self.total_pnl);
        println!("  Max Drawdown:          {:.2}", self.max_drawdown);

        println!("\nTRADES");
        println!(
            "  Total:                 {} ({} long, {} short)",
            self.total_trades, self.long_trades, self.short_trades
        );
        println!(
            "  Winning:               {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing:                {}", self.losing_trades);

        if self.total_trades > 0 {
            println!("\nWIN/LOSS");
            println!("  Average Win:           {:.2}", self.avg_win);
            println!("  Average Loss:          {:.2}", self.avg_loss);
            println!("  Largest Win:           {:.2}", self.largest_win);
            println!("  Largest Loss:          {:.2}", self.largest_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);
            println!(
                "  Avg Holding:           {:.1} minutes",
                self.avg_holding_period_minutes
            );
        }

        println!();
    }
}
