use futures::{stream, StreamExt};
use jiff::civil::Date;
use log::{error, info};

use crate::api::opower::client::UsageApi;
use crate::api::opower::usage_export::read_usage_export;
use crate::config::SyncConfig;
use crate::db::interval_usage_archive::IntervalUsageArchive;
use crate::error::SyncError;
use crate::interval::month::{months_between, Month};

#[derive(Debug)]
pub struct MonthOutcome {
    pub month: Month,
    /// Number of readings written
    pub result: Result<usize, SyncError>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// One entry per month, sorted by month
    pub outcomes: Vec<MonthOutcome>,
}

impl SyncReport {
    pub fn succeeded(&self) -> Vec<Month> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.month)
            .collect()
    }

    pub fn failed(&self) -> Vec<(Month, &SyncError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.month, e)))
            .collect()
    }

    /// Error out if any month failed, naming all of them.
    pub fn into_result(self) -> Result<Vec<Month>, SyncError> {
        let failed: Vec<(Month, String)> = self
            .failed()
            .into_iter()
            .map(|(m, e)| (m, e.to_string()))
            .collect();
        if failed.is_empty() {
            Ok(self.succeeded())
        } else {
            Err(SyncError::MonthsFailed(failed))
        }
    }
}

/// Download the usage for one month and write it to the archive,
/// replacing the existing file if any.  Return the number of readings.
pub async fn sync_month<A: UsageApi>(
    api: &A,
    archive: &IntervalUsageArchive,
    customer_id: &str,
    month: Month,
) -> Result<usize, SyncError> {
    let bytes = api
        .usage_export(customer_id, month.start_date(), month.end_date())
        .await?;
    let readings = read_usage_export(&bytes)?;
    archive.write_month(&month, &readings).await?;
    Ok(readings.len())
}

/// Download all the months concurrently.  A failed month doesn't stop the others.
pub async fn download_months<A: UsageApi>(
    api: &A,
    archive: &IntervalUsageArchive,
    customer_id: &str,
    months: Vec<Month>,
    max_concurrent: Option<usize>,
) -> SyncReport {
    let limit = max_concurrent.unwrap_or(months.len()).max(1);
    let mut outcomes: Vec<MonthOutcome> = stream::iter(months)
        .map(move |month| async move {
            let result = sync_month(api, archive, customer_id, month).await;
            match &result {
                Ok(n) => info!("{}: {} readings", month, n),
                Err(e) => error!("failed to sync {}: {}", month, e),
            }
            MonthOutcome { month, result }
        })
        .buffer_unordered(limit)
        .collect()
        .await;
    outcomes.sort_by_key(|o| o.month);
    SyncReport { outcomes }
}

/// Bring the archive up to date with the last complete month.
///
/// The most recent month on disk is downloaded again, together with every
/// month after it up to (not including) the month of `today`.  A month that
/// failed inside a gap is not picked up by the next run unless it is the
/// most recent one on disk.
pub async fn run_sync<A: UsageApi>(
    api: &mut A,
    archive: &IntervalUsageArchive,
    config: &SyncConfig,
    today: Date,
) -> Result<SyncReport, SyncError> {
    archive.ensure_dir()?;
    let start = archive.resume_point(config.epoch)?;
    let months: Vec<Month> = months_between(start, today).collect();
    if months.is_empty() {
        info!("nothing to download, resume month {} is not complete", start);
        return Ok(SyncReport::default());
    }

    api.login().await?;
    let customer_id = api.customer_id().await?;
    for month in &months {
        info!("will download {}", month);
    }
    let api: &A = api;
    let report = download_months(
        api,
        archive,
        &customer_id,
        months,
        config.max_concurrent_downloads,
    )
    .await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::opower::usage_export::tests::make_zip;
    use crate::interval::month::month;
    use jiff::{civil::date, ToSpan};
    use std::collections::HashSet;
    use std::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// One reading per day, the value being the day of the month.
    fn export_for(start: Date, end: Date) -> Vec<u8> {
        let mut csv = String::from(
            "Name,JANE DOE\nAddress,\"1 MAIN ST\"\nAccount Number,1\nService,Service 1\n\n",
        );
        csv.push_str("TYPE,DATE,START TIME,END TIME,USAGE,UNITS,COST,NOTES\n");
        for day in start.series(1.day()).take_while(|d| *d <= end) {
            csv.push_str(&format!(
                "Electric usage,{},00:00,23:59,{},kWh,,\n",
                day,
                day.day()
            ));
        }
        make_zip(&[("pge_electric_interval_data_1_x.csv", &csv)])
    }

    #[derive(Default)]
    struct FakeApi {
        logged_in: bool,
        logins: usize,
        fail_login: bool,
        fail: HashSet<Month>,
        requests: Mutex<Vec<(Date, Date)>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl UsageApi for FakeApi {
        async fn login(&mut self) -> Result<(), SyncError> {
            if self.logged_in {
                return Ok(());
            }
            if self.fail_login {
                return Err(SyncError::Auth("bad password".to_string()));
            }
            self.logins += 1;
            self.logged_in = true;
            Ok(())
        }

        async fn customer_id(&self) -> Result<String, SyncError> {
            if !self.logged_in {
                return Err(SyncError::Auth("not logged in".to_string()));
            }
            Ok("0a1b2c3d".to_string())
        }

        async fn usage_export(
            &self,
            customer_id: &str,
            start: Date,
            end: Date,
        ) -> Result<Vec<u8>, SyncError> {
            assert_eq!(customer_id, "0a1b2c3d");
            if !self.logged_in {
                return Err(SyncError::Auth("not logged in".to_string()));
            }
            self.requests.lock().unwrap().push((start, end));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.contains(&Month::containing(start)) {
                return Err(SyncError::Export("simulated failure".to_string()));
            }
            Ok(export_for(start, end))
        }
    }

    fn setup() -> Result<(tempfile::TempDir, IntervalUsageArchive, SyncConfig), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = IntervalUsageArchive::new(dir.path().join("interval_data"));
        let config = SyncConfig::new(&archive.base_dir, dir.path().join("password"), "jdoe");
        Ok((dir, archive, config))
    }

    #[tokio::test]
    async fn fake_login_is_idempotent() -> Result<(), Box<dyn Error>> {
        let mut api = FakeApi::default();
        api.login().await?;
        api.login().await?;
        assert!(api.logged_in);
        assert_eq!(api.logins, 1);
        Ok(())
    }

    #[tokio::test]
    async fn bootstrap_from_epoch() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let (_dir, archive, mut config) = setup()?;
        config.epoch = month(2019, 12);
        let mut api = FakeApi::default();
        let report = run_sync(&mut api, &archive, &config, date(2020, 3, 10)).await?;

        let months = report.into_result()?;
        assert_eq!(months, vec![month(2019, 12), month(2020, 1), month(2020, 2)]);
        assert_eq!(archive.months()?, months);
        let mut requests = api.requests.lock().unwrap().clone();
        requests.sort();
        assert_eq!(
            requests,
            vec![
                (date(2019, 12, 1), date(2019, 12, 31)),
                (date(2020, 1, 1), date(2020, 1, 31)),
                (date(2020, 2, 1), date(2020, 2, 29)),
            ]
        );
        let feb = archive.read_month(&month(2020, 2)).await?;
        assert_eq!(feb.len(), 29);
        assert_eq!(feb.first(), Some(&1.0));
        assert_eq!(feb.last(), Some(&29.0));
        Ok(())
    }

    #[tokio::test]
    async fn refetch_last_month() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, config) = setup()?;
        archive.ensure_dir()?;
        archive.write_month(&month(2021, 2), &[7.0]).await?;
        archive.write_month(&month(2021, 3), &[9.0]).await?;

        let mut api = FakeApi::default();
        let report = run_sync(&mut api, &archive, &config, date(2021, 4, 15)).await?;
        assert_eq!(report.into_result()?, vec![month(2021, 3)]);
        assert_eq!(
            *api.requests.lock().unwrap(),
            vec![(date(2021, 3, 1), date(2021, 3, 31))]
        );
        assert_eq!(archive.read_month(&month(2021, 3)).await?.len(), 31);
        assert_eq!(archive.read_month(&month(2021, 2)).await?, vec![7.0]);
        Ok(())
    }

    #[tokio::test]
    async fn nothing_to_do_when_caught_up() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, config) = setup()?;
        archive.ensure_dir()?;
        archive.write_month(&month(2021, 4), &[1.0]).await?;

        let mut api = FakeApi::default();
        let report = run_sync(&mut api, &archive, &config, date(2021, 4, 15)).await?;
        assert!(report.outcomes.is_empty());
        assert_eq!(api.logins, 0);
        assert!(api.requests.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_month_does_not_block_others() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, mut config) = setup()?;
        config.epoch = month(2021, 1);
        let mut api = FakeApi {
            fail: HashSet::from([month(2021, 2)]),
            ..Default::default()
        };
        let report = run_sync(&mut api, &archive, &config, date(2021, 5, 2)).await?;

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(
            report.succeeded(),
            vec![month(2021, 1), month(2021, 3), month(2021, 4)]
        );
        let failed: Vec<Month> = report.failed().into_iter().map(|(m, _)| m).collect();
        assert_eq!(failed, vec![month(2021, 2)]);
        assert_eq!(
            archive.months()?,
            vec![month(2021, 1), month(2021, 3), month(2021, 4)]
        );
        match report.into_result() {
            Err(SyncError::MonthsFailed(xs)) => {
                assert_eq!(xs.len(), 1);
                assert_eq!(xs[0].0, month(2021, 2));
            }
            other => panic!("expected a failure, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn one_download_at_a_time() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, mut config) = setup()?;
        config.epoch = month(2020, 10);
        config.max_concurrent_downloads = Some(1);
        let mut api = FakeApi::default();
        let report = run_sync(&mut api, &archive, &config, date(2021, 2, 1)).await?;
        assert_eq!(report.into_result()?.len(), 4);
        assert_eq!(api.peak_in_flight.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn all_months_at_once_by_default() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, mut config) = setup()?;
        config.epoch = month(2020, 10);
        let mut api = FakeApi::default();
        let report = run_sync(&mut api, &archive, &config, date(2021, 2, 1)).await?;
        assert_eq!(report.into_result()?.len(), 4);
        assert_eq!(api.peak_in_flight.load(Ordering::SeqCst), 4);
        assert_eq!(api.in_flight.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn limit_caps_downloads_in_flight() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, mut config) = setup()?;
        config.epoch = month(2020, 7);
        config.max_concurrent_downloads = Some(2);
        let mut api = FakeApi::default();
        let report = run_sync(&mut api, &archive, &config, date(2021, 2, 1)).await?;
        assert_eq!(report.into_result()?.len(), 7);
        assert_eq!(api.peak_in_flight.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn login_failure_stops_the_run() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, config) = setup()?;
        let mut api = FakeApi {
            fail_login: true,
            ..Default::default()
        };
        let res = run_sync(&mut api, &archive, &config, date(2021, 2, 1)).await;
        assert!(matches!(res, Err(SyncError::Auth(_))));
        assert!(api.requests.lock().unwrap().is_empty());
        assert!(archive.months()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_file_stops_the_run() -> Result<(), Box<dyn Error>> {
        let (_dir, archive, config) = setup()?;
        archive.ensure_dir()?;
        archive.write_month(&month(2021, 1), &[1.0]).await?;
        std::fs::write(archive.base_dir.join("2021-2.msgpack"), b"")?;

        let mut api = FakeApi::default();
        let res = run_sync(&mut api, &archive, &config, date(2021, 4, 1)).await;
        assert!(matches!(res, Err(SyncError::MalformedArtifact { .. })));
        assert_eq!(api.logins, 0);
        Ok(())
    }
}
